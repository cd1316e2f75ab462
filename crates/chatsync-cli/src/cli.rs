//! Clap CLI definitions for chatsync.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  chatsync                      Run the hub with ~/.chatsync/config.toml
  chatsync --config hub.toml    Run the hub with another config file
  chatsync check                Validate the config without connecting
  chatsync channels             List the channel types this build supports

\x1b[1;36mLogging:\x1b[0m
  RUST_LOG overrides --log-level, e.g. RUST_LOG=chatsync_hub=debug";

/// Relay chat messages between IRC, Tox and plain files.
#[derive(Parser)]
#[command(name = "chatsync", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the hub and relay until Ctrl+C (default).
    Run,
    /// Validate the config and construct every channel without activating it.
    Check {
        /// Output results as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List the registered channel types.
    Channels,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_is_default() {
        let cli = Cli::parse_from(["chatsync"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
        assert!(!cli.log_json);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "chatsync",
            "check",
            "--json",
            "--config",
            "hub.toml",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.command, Some(Commands::Check { json: true }));
        assert_eq!(cli.config, Some(PathBuf::from("hub.toml")));
        assert_eq!(cli.log_level, "debug");
    }
}
