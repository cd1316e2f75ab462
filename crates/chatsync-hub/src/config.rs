//! Configuration loading from `~/.chatsync/config.toml`.

use chatsync_types::config::ChatsyncConfig;
use chatsync_types::error::ConfigError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Read, parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<ChatsyncConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents)?;
    info!(
        path = %path.display(),
        channels = config.channels.len(),
        "Loaded configuration"
    );
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(contents: &str) -> Result<ChatsyncConfig, ConfigError> {
    let config: ChatsyncConfig =
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    chatsync_home().join("config.toml")
}

/// Get the default chatsync home directory.
pub fn chatsync_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".chatsync")
}
