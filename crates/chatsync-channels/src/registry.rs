//! Channel type registry.
//!
//! Maps a channel type tag to a creator closure that builds an inactive
//! [`Channel`] from its configuration. Populated once at startup.

use crate::file::FileChannel;
use crate::irc::IrcChannel;
use crate::tox::ToxChannel;
use crate::types::Channel;
use chatsync_types::config::ChannelConfig;
use chatsync_types::error::{ConfigError, RegistryError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Builds a channel from its configuration entry.
pub type ChannelCreator =
    Arc<dyn Fn(&ChannelConfig) -> Result<Arc<dyn Channel>, ConfigError> + Send + Sync>;

/// Registry of channel creators keyed by type tag.
#[derive(Clone, Default)]
pub struct ChannelFactory {
    creators: BTreeMap<String, ChannelCreator>,
}

impl ChannelFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with the `file`, `irc` and `tox` adapters registered.
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        factory.insert(FileChannel::TYPE, |config| {
            Ok(Arc::new(FileChannel::from_config(config)?) as Arc<dyn Channel>)
        });
        factory.insert(IrcChannel::TYPE, |config| {
            Ok(Arc::new(IrcChannel::from_config(config)?) as Arc<dyn Channel>)
        });
        factory.insert(ToxChannel::TYPE, |config| {
            Ok(Arc::new(ToxChannel::from_config(config)?) as Arc<dyn Channel>)
        });
        factory
    }

    /// Add a creator for `type_id`. Registering the same type twice is an
    /// error; creators are never silently replaced.
    pub fn register<F>(&mut self, type_id: &str, creator: F) -> Result<(), RegistryError>
    where
        F: Fn(&ChannelConfig) -> Result<Arc<dyn Channel>, ConfigError> + Send + Sync + 'static,
    {
        if self.creators.contains_key(type_id) {
            return Err(RegistryError::AlreadyRegistered(type_id.to_string()));
        }
        self.insert(type_id, creator);
        Ok(())
    }

    fn insert<F>(&mut self, type_id: &str, creator: F)
    where
        F: Fn(&ChannelConfig) -> Result<Arc<dyn Channel>, ConfigError> + Send + Sync + 'static,
    {
        self.creators.insert(type_id.to_string(), Arc::new(creator));
    }

    /// Build an inactive channel. Construction never activates it.
    pub fn create(&self, config: &ChannelConfig) -> Result<Arc<dyn Channel>, ConfigError> {
        config.validate_name()?;
        let creator = self
            .creators
            .get(&config.type_id)
            .ok_or_else(|| ConfigError::UnknownChannelType(config.type_id.clone()))?;
        let channel = creator(config)?;
        debug!(
            channel = %config.name,
            channel_type = %config.type_id,
            direction = %config.direction,
            "channel created"
        );
        Ok(channel)
    }

    /// Registered type tags in sorted order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.creators.keys().map(String::as_str)
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.creators.contains_key(type_id)
    }
}

impl std::fmt::Debug for ChannelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelFactory")
            .field("types", &self.creators.keys().collect::<Vec<_>>())
            .finish()
    }
}
