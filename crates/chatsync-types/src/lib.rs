//! Core types for chatsync.
//!
//! This crate defines the values shared by the channel adapters and the hub:
//! messages and their senders, channel identity and lifecycle states, the
//! configuration model and the error taxonomy. It contains no business logic.

pub mod channel;
pub mod config;
pub mod error;
pub mod message;
