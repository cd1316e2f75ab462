//! Hub error types.

use chatsync_types::error::{ConfigError, RegistryError};
use thiserror::Error;

/// Errors raised while assembling or starting a hub.
///
/// Channel failures never surface here; the hub turns them into lifecycle
/// transitions and log events.
#[derive(Error, Debug)]
pub enum HubError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Nothing to relay between.
    #[error("hub '{0}' has no channels")]
    NoChannels(String),

    #[error("hub is already started")]
    AlreadyStarted,
}

/// Alias for hub results.
pub type HubResult<T> = Result<T, HubError>;
