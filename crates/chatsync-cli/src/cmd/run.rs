//! `chatsync run`: relay until Ctrl+C.

use crate::ui;
use anyhow::Context;
use chatsync_channels::ChannelFactory;
use chatsync_hub::config::load_config;
use chatsync_hub::Hub;
use chatsync_types::config::ChatsyncConfig;
use std::path::PathBuf;
use tracing::info;

pub fn cmd_run(config: Option<PathBuf>) -> anyhow::Result<()> {
    let path = super::config_path(config);
    if !path.exists() {
        ui::error_with_fix(
            &format!("No config file at {}", path.display()),
            "Create one with a [[channels]] table, or pass --config <path>",
        );
        std::process::exit(1);
    }
    let config = load_config(&path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;

    let rt = tokio::runtime::Runtime::new().context("failed to start the tokio runtime")?;
    rt.block_on(run_hub(config))
}

async fn run_hub(config: ChatsyncConfig) -> anyhow::Result<()> {
    let factory = ChannelFactory::with_builtin();
    let (mut hub, rejected) = Hub::from_config(&config, &factory).await?;

    ui::banner();
    ui::blank();
    for error in &rejected {
        ui::warn(&format!("Skipped channel: {error}"));
    }
    hub.start().await?;

    let status = hub.status().await;
    ui::success(&format!("Hub '{}' started with {} channel(s)", hub.name(), status.len()));
    for channel in &status {
        ui::kv(
            &channel.name,
            &format!("{} ({})", channel.channel_type, channel.direction),
        );
    }
    ui::blank();
    ui::hint("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!(hub = %hub.name(), "interrupt received");

    hub.shutdown().await;
    ui::success(&format!("Hub stopped after relaying {} message(s)", hub.sequence()));
    Ok(())
}
