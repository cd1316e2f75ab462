//! Error taxonomy shared by channels, the factory and the hub.
//!
//! Channel errors are recoverable at the hub boundary: they turn into
//! lifecycle transitions and log events, never into a process exit.
//! Configuration errors are raised before a channel is constructed.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed cause attached to a channel error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which stage of a channel's life an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelErrorKind {
    /// The channel could not reach the active state.
    Activate,
    /// An established connection failed or rejected an operation.
    Connection,
}

impl std::fmt::Display for ChannelErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activate => write!(f, "activate_error"),
            Self::Connection => write!(f, "connection_error"),
        }
    }
}

/// Failure of a channel transport.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The transport could not reach a usable state.
    #[error("channel '{channel}' cannot activate: {reason}")]
    Activate {
        channel: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The established transport failed or the channel is not active.
    #[error("channel '{channel}' connection error: {reason}")]
    Connection {
        channel: String,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ChannelError {
    pub fn activate(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Activate {
            channel: channel.into(),
            reason: reason.into(),
            source: None,
        }
    }

    pub fn connection(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            channel: channel.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            Self::Activate { source, .. } | Self::Connection { source, .. } => {
                *source = Some(cause.into());
            }
        }
        self
    }

    pub fn kind(&self) -> ChannelErrorKind {
        match self {
            Self::Activate { .. } => ChannelErrorKind::Activate,
            Self::Connection { .. } => ChannelErrorKind::Connection,
        }
    }

    /// Name of the channel that failed.
    pub fn channel(&self) -> &str {
        match self {
            Self::Activate { channel, .. } | Self::Connection { channel, .. } => channel,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Activate { reason, .. } | Self::Connection { reason, .. } => reason,
        }
    }

    /// The reason followed by every cause in the source chain.
    pub fn cause_chain(&self) -> String {
        let mut out = self.reason().to_string();
        let mut next = std::error::Error::source(self);
        while let Some(cause) = next {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            next = cause.source();
        }
        out
    }
}

/// Invalid or incomplete configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required option is absent.
    #[error("channel '{channel}': option '{option}' is not configured")]
    MissingOption { channel: String, option: String },

    /// An option is present but its value cannot be used.
    #[error("channel '{channel}': malformed value for option '{option}': {reason}")]
    InvalidOption {
        channel: String,
        option: String,
        reason: String,
    },

    /// An inline channel description used a scheme other than `data://`.
    #[error("access scheme is not supported: {0}")]
    Scheme(String),

    /// No creator is registered for the requested channel type.
    #[error("unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// Two channels share a name.
    #[error("duplicate channel name '{0}'")]
    DuplicateChannel(String),

    /// The channel name is empty or reserved.
    #[error("invalid channel name '{0}'")]
    InvalidName(String),

    /// Hub-wide settings are out of range.
    #[error("invalid setting '{setting}': {reason}")]
    Setting { setting: String, reason: String },

    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn missing(channel: impl Into<String>, option: impl Into<String>) -> Self {
        Self::MissingOption {
            channel: channel.into(),
            option: option.into(),
        }
    }

    pub fn malformed(
        channel: impl Into<String>,
        option: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidOption {
            channel: channel.into(),
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Misuse of the channel type registry. Only raised at setup time.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("channel type '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_kind() {
        let err = ChannelError::activate("irc", "host not found");
        assert_eq!(err.kind(), ChannelErrorKind::Activate);
        assert_eq!(err.channel(), "irc");
        assert_eq!(err.to_string(), "channel 'irc' cannot activate: host not found");

        let err = ChannelError::connection("tox", "bridge closed");
        assert_eq!(err.kind(), ChannelErrorKind::Connection);
        assert_eq!(err.kind().to_string(), "connection_error");
    }

    #[test]
    fn test_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ChannelError::activate("irc", "connect failed").with_source(io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.cause_chain(), "connect failed: refused");
    }

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::missing("irc", "server");
        assert_eq!(
            err.to_string(),
            "channel 'irc': option 'server' is not configured"
        );
        let err = ConfigError::UnknownChannelType("bogus".into());
        assert_eq!(err.to_string(), "unknown channel type 'bogus'");
    }
}
