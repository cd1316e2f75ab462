//! The contract every transport adapter implements.

use async_trait::async_trait;
use chatsync_types::channel::{ChannelId, Direction};
use chatsync_types::error::ChannelError;
use chatsync_types::message::{Message, User};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A managed connection to one chat transport.
///
/// Adapters are constructed inactive by the [`ChannelFactory`](crate::ChannelFactory).
/// The hub activates them, relays messages to them through [`send`](Channel::send)
/// and receives their traffic through the [`Inbound`] handle passed to
/// [`activate`](Channel::activate).
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name inside the hub.
    fn name(&self) -> &str;

    /// Registered type tag (`file`, `irc`, `tox`, ...).
    fn channel_type(&self) -> &'static str;

    fn direction(&self) -> Direction;

    fn id(&self) -> ChannelId {
        ChannelId::new(self.name())
    }

    /// Establish the underlying session.
    ///
    /// Calling this on an active channel succeeds without opening a second
    /// session. After a failure the hub calls [`deactivate`](Channel::deactivate)
    /// before activating again. Received messages and asynchronous failures are
    /// reported through `inbound`.
    async fn activate(&self, inbound: Inbound) -> Result<(), ChannelError>;

    /// Transmit a message in the transport's native form.
    ///
    /// Fails with [`ChannelError::Connection`] when the channel is not active.
    async fn send(&self, message: &Message) -> Result<(), ChannelError>;

    /// Release the session. Never fails.
    async fn deactivate(&self);

    fn is_active(&self) -> bool;
}

/// A message received by a channel, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub origin: ChannelId,
    pub message: Message,
}

/// Push handle an active channel uses to report traffic to the hub.
#[derive(Debug, Clone)]
pub struct Inbound {
    channel: ChannelId,
    messages: mpsc::Sender<InboundMessage>,
    failures: mpsc::Sender<ChannelError>,
}

impl Inbound {
    pub fn new(
        channel: ChannelId,
        messages: mpsc::Sender<InboundMessage>,
        failures: mpsc::Sender<ChannelError>,
    ) -> Self {
        Self {
            channel,
            messages,
            failures,
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    /// A user observed on this channel.
    pub fn user(&self, name: impl Into<String>) -> User {
        User::new(name, self.channel.clone())
    }

    /// Hand a received message to the hub. Returns `false` once the hub has
    /// stopped listening; the message is then dropped and the caller should
    /// end its session.
    pub async fn deliver(&self, message: Message) -> bool {
        let sent = self
            .messages
            .send(InboundMessage {
                origin: self.channel.clone(),
                message,
            })
            .await;
        if let Err(mpsc::error::SendError(lost)) = sent {
            warn!(
                channel = %self.channel,
                from = %lost.message.user().name(),
                "inbound message dropped, hub stopped"
            );
            return false;
        }
        true
    }

    /// Report that the established session broke.
    pub fn fail(&self, error: ChannelError) {
        if let Err(e) = self.failures.try_send(error) {
            debug!(channel = %self.channel, "failure report not delivered: {e}");
        }
    }
}

/// Split `text` into chunks of at most `max_len` bytes, preferring to break
/// at whitespace and never inside a UTF-8 sequence.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(4);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_len {
        let mut cut = max_len;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let at = if rest[cut..].starts_with(char::is_whitespace) {
            cut
        } else {
            rest[..cut]
                .rfind(char::is_whitespace)
                .filter(|&i| i > 0)
                .unwrap_or(cut)
        };
        chunks.push(rest[..at].trim_end().to_string());
        rest = rest[at..].trim_start();
    }

    if !rest.is_empty() || chunks.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
