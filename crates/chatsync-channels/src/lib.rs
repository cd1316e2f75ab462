//! Channel layer for chatsync.
//!
//! Defines the [`Channel`](types::Channel) contract every transport adapter
//! implements, the [`ChannelFactory`](registry::ChannelFactory) that builds
//! adapters from configuration, and the built-in adapters: a file log, an IRC
//! client and a Tox bridge client.

pub mod file;
pub mod irc;
pub mod registry;
mod session;
pub mod tox;
pub mod types;

pub use registry::{ChannelCreator, ChannelFactory};
pub use types::{Channel, Inbound, InboundMessage};
