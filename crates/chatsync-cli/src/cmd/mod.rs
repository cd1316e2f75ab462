//! Command implementations.

pub mod channels;
pub mod check;
pub mod run;

use chatsync_hub::config::default_config_path;
use std::path::PathBuf;

/// The `--config` path, or `~/.chatsync/config.toml`.
pub(crate) fn config_path(config: Option<PathBuf>) -> PathBuf {
    config.unwrap_or_else(default_config_path)
}
