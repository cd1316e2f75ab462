//! Configuration types for chatsync.
//!
//! The hub consumes an already-parsed [`ChatsyncConfig`]: hub settings, the
//! retry policy and an ordered list of [`ChannelConfig`] entries. Every key of
//! a channel entry other than `type`, `name` and `direction` is an adapter
//! option, kept as a string-convertible [`OptionValue`] and read through the
//! typed accessors on [`ChannelConfig`].

use crate::channel::{ChannelId, Direction};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Prefix of the inline channel description format.
pub const DATA_SCHEME: &str = "data://";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatsyncConfig {
    pub hub: HubSettings,
    pub retry: RetrySettings,
    pub channels: Vec<ChannelConfig>,
}

impl ChatsyncConfig {
    /// Check hub-wide settings. Channel entries are validated one by one when
    /// the hub is assembled, so a bad entry never blocks the others.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hub.validate()?;
        self.retry.validate()
    }
}

/// Settings of the hub itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Human-readable hub name, used in logs.
    pub name: String,
    /// Capacity of each destination's outbound queue.
    pub queue_capacity: usize,
    /// Capacity of the shared inbound queue.
    pub inbound_capacity: usize,
    /// How long shutdown waits for queued sends before giving up.
    pub shutdown_timeout_ms: u64,
    /// Broadcast "channel X connected/disconnected" notices.
    pub announce_lifecycle: bool,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            name: "chatsync".to_string(),
            queue_capacity: 256,
            inbound_capacity: 1024,
            shutdown_timeout_ms: 5_000,
            announce_lifecycle: true,
        }
    }
}

impl HubSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(setting_error("hub.queue_capacity", "must be at least 1"));
        }
        if self.inbound_capacity == 0 {
            return Err(setting_error("hub.inbound_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Bounded retry with exponential backoff, applied per failure episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Consecutive failed activations before a channel is removed.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound of the backoff, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 = none, 1.0 = up to double the delay).
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.1,
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(setting_error("retry.max_attempts", "must be at least 1"));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(setting_error(
                "retry.min_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(setting_error("retry.jitter", "must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

fn setting_error(setting: &str, reason: &str) -> ConfigError {
    ConfigError::Setting {
        setting: setting.to_string(),
        reason: reason.to_string(),
    }
}

/// A scalar adapter option as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// One `(type, adapter config)` entry: which adapter to build and with what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Registered channel type (`file`, `irc`, `tox`, ...).
    #[serde(rename = "type")]
    pub type_id: String,
    /// Unique channel name inside the hub.
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    /// Adapter-specific options.
    #[serde(flatten)]
    pub options: BTreeMap<String, OptionValue>,
}

impl ChannelConfig {
    pub fn new(type_id: impl Into<String>, name: impl Into<String>, direction: Direction) -> Self {
        Self {
            type_id: type_id.into(),
            name: name.into(),
            direction,
            options: BTreeMap::new(),
        }
    }

    /// Builder-style option setter.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse the inline form `data://key=value\nkey=value`.
    ///
    /// `name` is required, `direction` defaults to `both`, every other key
    /// becomes an adapter option.
    pub fn from_data_uri(type_id: &str, uri: &str) -> Result<Self, ConfigError> {
        let Some(body) = uri.strip_prefix(DATA_SCHEME) else {
            let scheme = uri.split("://").next().unwrap_or(uri);
            return Err(ConfigError::Scheme(scheme.to_string()));
        };

        let mut name = None;
        let mut direction = Direction::default();
        let mut options = BTreeMap::new();

        for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| ConfigError::Parse(format!("malformed option line '{line}'")))?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "name" => name = Some(value.to_string()),
                "direction" => {
                    direction = value.parse().map_err(|reason: String| {
                        ConfigError::malformed(name.clone().unwrap_or_default(), "direction", reason)
                    })?;
                }
                _ => {
                    options.insert(key.to_string(), OptionValue::Text(value.to_string()));
                }
            }
        }

        let name = name.ok_or_else(|| ConfigError::missing("?", "name"))?;
        Ok(Self {
            type_id: type_id.to_string(),
            name,
            direction,
            options,
        })
    }

    pub fn id(&self) -> ChannelId {
        ChannelId::new(self.name.clone())
    }

    /// Reject empty names and the name reserved for the hub.
    pub fn validate_name(&self) -> Result<(), ConfigError> {
        let trimmed = self.name.trim();
        if trimmed.is_empty() || trimmed != self.name || trimmed == ChannelId::HUB {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }
        Ok(())
    }

    /// String form of an option, if present.
    pub fn option(&self, key: &str) -> Option<String> {
        self.options.get(key).map(ToString::to_string)
    }

    /// A non-empty option that must be present.
    pub fn require(&self, key: &str) -> Result<String, ConfigError> {
        match self.option(key) {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(ConfigError::missing(&self.name, key)),
        }
    }

    /// String option with a fallback.
    pub fn option_or(&self, key: &str, default: &str) -> String {
        self.option(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse an optional option into `T`.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.option(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::malformed(&self.name, key, e.to_string())),
        }
    }

    /// Parse an option into `T`, using `default` when it is absent.
    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Boolean option accepting `true/false`, `yes/no`, `on/off` and `1/0`.
    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.option(key) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            other => Err(ConfigError::malformed(
                &self.name,
                key,
                format!("expected a boolean, got '{other}'"),
            )),
        }
    }
}
