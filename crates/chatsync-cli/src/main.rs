//! chatsync CLI: runs a relay hub from a TOML config file.

mod cli;
mod cmd;
pub mod table;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;

fn init_tracing_stderr(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr(&cli.log_level, cli.log_json);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd::run::cmd_run(cli.config),
        Commands::Check { json } => cmd::check::cmd_check(cli.config, json),
        Commands::Channels => {
            cmd::channels::cmd_channels();
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %format!("{e:#}"), "chatsync exiting");
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
