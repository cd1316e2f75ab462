//! Channel identity, transmission direction and lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a channel inside one hub.
///
/// Channels are identified by their configured name, which the hub keeps
/// unique. The reserved name [`ChannelId::HUB`] marks messages the hub
/// synthesizes itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Name reserved for the hub itself.
    pub const HUB: &'static str = "hub";

    /// Create an identifier from a channel name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identifier of the hub, origin of lifecycle notices.
    pub fn hub() -> Self {
        Self(Self::HUB.to_string())
    }

    /// Whether this identifier refers to the hub rather than a channel.
    pub fn is_hub(&self) -> bool {
        self.0 == Self::HUB
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Which way data flows through a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// The channel only produces messages for the hub.
    #[serde(alias = "in")]
    Input,
    /// The channel only receives relayed messages.
    #[serde(alias = "out")]
    Output,
    /// The channel both produces and receives messages.
    #[default]
    #[serde(alias = "bidirectional")]
    Both,
}

impl Direction {
    /// Whether the hub accepts inbound messages from this channel.
    pub fn can_input(self) -> bool {
        matches!(self, Self::Input | Self::Both)
    }

    /// Whether the hub relays messages to this channel.
    pub fn can_output(self) -> bool {
        matches!(self, Self::Output | Self::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
            Self::Both => write!(f, "both"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" | "in" => Ok(Self::Input),
            "output" | "out" => Ok(Self::Output),
            "both" | "bidirectional" => Ok(Self::Both),
            other => Err(format!("wrong channel direction '{other}'")),
        }
    }
}

/// Lifecycle state of a channel managed by the hub.
///
/// `Inactive -> Activating -> Active -> Failed -> Retrying -> Activating`,
/// or `Retrying -> Removed` once the retry budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Inactive,
    Activating,
    Active,
    Failed,
    Retrying,
    Removed,
}

impl ChannelState {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// Removed channels are never activated again by the hub.
    pub fn is_terminal(self) -> bool {
        self == Self::Removed
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Activating => write!(f, "activating"),
            Self::Active => write!(f, "active"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Removed => write!(f, "removed"),
        }
    }
}
