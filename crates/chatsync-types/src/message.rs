//! Chat content and the identity that produced it.
//!
//! A [`Message`] is built once by the adapter that received it and is never
//! mutated afterwards; the hub shares it read-only between destinations.

use crate::channel::ChannelId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display name of the sender of hub-generated messages.
pub const SYSTEM_USER_NAME: &str = "chatsync";

/// Identity of a message originator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    name: String,
    origin: ChannelId,
}

impl User {
    /// Create a user seen on the given channel.
    pub fn new(name: impl Into<String>, origin: ChannelId) -> Self {
        Self {
            name: name.into(),
            origin,
        }
    }

    /// The sender of lifecycle notices generated by the hub.
    pub fn system() -> Self {
        Self::new(SYSTEM_USER_NAME, ChannelId::hub())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel the user was observed on.
    pub fn origin(&self) -> &ChannelId {
        &self.origin
    }

    pub fn is_system(&self) -> bool {
        self.origin.is_hub()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Discriminant of a [`MessageBody`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Action,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// The content variants a message can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "lowercase")]
pub enum MessageBody {
    /// Plain text.
    Text(String),
    /// A narrated action, rendered specially by some transports (IRC `/me`).
    Action(String),
}

/// A chat message in flight through the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    user: User,
    body: MessageBody,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(user: User, body: MessageBody) -> Self {
        Self {
            user,
            body,
            timestamp: Utc::now(),
        }
    }

    /// Build a plain text message.
    pub fn text(user: User, text: impl Into<String>) -> Self {
        Self::new(user, MessageBody::Text(text.into()))
    }

    /// Build an action message.
    pub fn action(user: User, text: impl Into<String>) -> Self {
        Self::new(user, MessageBody::Action(text.into()))
    }

    /// Build a message of the given kind.
    pub fn of_kind(kind: MessageKind, user: User, text: impl Into<String>) -> Self {
        match kind {
            MessageKind::Text => Self::text(user, text),
            MessageKind::Action => Self::action(user, text),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn kind(&self) -> MessageKind {
        match self.body {
            MessageBody::Text(_) => MessageKind::Text,
            MessageBody::Action(_) => MessageKind::Action,
        }
    }

    /// The text payload regardless of variant.
    pub fn content(&self) -> &str {
        match &self.body {
            MessageBody::Text(t) | MessageBody::Action(t) => t,
        }
    }

    pub fn is_action(&self) -> bool {
        self.kind() == MessageKind::Action
    }

    /// When the receiving adapter constructed the message.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Line form used by logs and the file adapter: `user: text` or
/// `user[ACTION]: text`.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            MessageBody::Text(t) => write!(f, "{}: {}", self.user, t),
            MessageBody::Action(t) => write!(f, "{}[ACTION]: {}", self.user, t),
        }
    }
}
