//! `chatsync check`: build every channel from the config without connecting.

use crate::table::{Table, Tone};
use crate::ui;
use anyhow::{bail, Context};
use chatsync_channels::ChannelFactory;
use chatsync_hub::config::load_config;
use chatsync_types::config::{ChannelConfig, ChatsyncConfig};
use chatsync_types::error::ConfigError;
use std::collections::HashSet;
use std::path::PathBuf;

/// Outcome of constructing one `[[channels]]` entry.
struct EntryCheck<'a> {
    entry: &'a ChannelConfig,
    error: Option<ConfigError>,
}

fn check_entries<'a>(config: &'a ChatsyncConfig, factory: &ChannelFactory) -> Vec<EntryCheck<'a>> {
    let mut seen = HashSet::new();
    config
        .channels
        .iter()
        .map(|entry| {
            let error = if !seen.insert(entry.name.as_str()) {
                Some(ConfigError::DuplicateChannel(entry.name.clone()))
            } else {
                factory.create(entry).err()
            };
            EntryCheck { entry, error }
        })
        .collect()
}

pub fn cmd_check(config: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let path = super::config_path(config);
    let config = load_config(&path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    let checks = check_entries(&config, &ChannelFactory::with_builtin());
    let failed = checks.iter().filter(|c| c.error.is_some()).count();

    if json {
        let entries: Vec<serde_json::Value> = checks
            .iter()
            .map(|c| {
                serde_json::json!({
                    "name": c.entry.name,
                    "type": c.entry.type_id,
                    "direction": c.entry.direction,
                    "ok": c.error.is_none(),
                    "error": c.error.as_ref().map(ToString::to_string),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        ui::kv("Config", &path.display().to_string());
        ui::kv("Hub", &config.hub.name);
        ui::blank();
        let mut table = Table::new(&["Channel", "Type", "Direction", "Result"]);
        for check in &checks {
            let direction = check.entry.direction.to_string();
            let result = match &check.error {
                Some(e) => (e.to_string(), Tone::Bad),
                None => ("ok".to_string(), Tone::Good),
            };
            table.add_toned_row(&[
                (check.entry.name.as_str(), Tone::Plain),
                (check.entry.type_id.as_str(), Tone::Plain),
                (direction.as_str(), Tone::Plain),
                (result.0.as_str(), result.1),
            ]);
        }
        table.print();
        ui::blank();
    }

    if config.channels.is_empty() {
        bail!("no channels configured in {}", path.display());
    }
    if failed > 0 {
        bail!("{failed} of {} channel(s) failed to build", checks.len());
    }
    if !json {
        ui::success(&format!("{} channel(s) ready", checks.len()));
    }
    Ok(())
}
