//! Relay hub for chatsync.
//!
//! The [`Hub`] owns a set of channels built by the
//! [`ChannelFactory`](chatsync_channels::ChannelFactory), drives each one
//! through its activation and retry lifecycle on its own task, and relays
//! every inbound message to all other active channels.

pub mod config;
pub mod error;
pub mod hub;
pub mod retry;
mod worker;

pub use error::{HubError, HubResult};
pub use hub::{ChannelStatus, Hub};
