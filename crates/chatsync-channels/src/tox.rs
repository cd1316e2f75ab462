//! Tox channel adapter.
//!
//! Tox cryptography, DHT bootstrap and friend management live in a local Tox
//! client daemon. The adapter connects to it over TCP and exchanges
//! newline-delimited JSON: a `hello` naming the friend to relay with, `send`
//! requests for outbound messages, and `message` / `offline` events back.

use crate::session::{self, Outgoing, WRITE_QUEUE};
use crate::types::{split_message, Channel, Inbound};
use async_trait::async_trait;
use chatsync_types::channel::Direction;
use chatsync_types::config::ChannelConfig;
use chatsync_types::error::{ChannelError, ConfigError};
use chatsync_types::message::{Message, MessageKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, trace, warn};

/// Bytes in a Tox address: public key, nospam and checksum.
pub const TOX_ID_SIZE: usize = 38;

/// Longest message the Tox protocol carries in one packet.
pub const TOX_MAX_MESSAGE_LENGTH: usize = 1372;

const PUBLIC_KEY_SIZE: usize = 32;
const NOSPAM_SIZE: usize = 4;

const DEFAULT_BRIDGE: &str = "127.0.0.1:33445";
const DEFAULT_NICKNAME: &str = "chatsync";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// A Tox address, validated against its checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToxId([u8; TOX_ID_SIZE]);

impl ToxId {
    /// Assemble an address, computing its checksum.
    pub fn from_parts(public_key: [u8; PUBLIC_KEY_SIZE], nospam: [u8; NOSPAM_SIZE]) -> Self {
        let mut bytes = [0u8; TOX_ID_SIZE];
        bytes[..PUBLIC_KEY_SIZE].copy_from_slice(&public_key);
        bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NOSPAM_SIZE].copy_from_slice(&nospam);
        let checksum = checksum(&bytes[..PUBLIC_KEY_SIZE + NOSPAM_SIZE]);
        bytes[PUBLIC_KEY_SIZE + NOSPAM_SIZE..].copy_from_slice(&checksum);
        Self(bytes)
    }

    pub fn public_key(&self) -> &[u8] {
        &self.0[..PUBLIC_KEY_SIZE]
    }

    pub fn as_bytes(&self) -> &[u8; TOX_ID_SIZE] {
        &self.0
    }
}

/// XOR of the address body folded into two bytes.
fn checksum(body: &[u8]) -> [u8; 2] {
    let mut sum = [0u8; 2];
    for (i, byte) in body.iter().enumerate() {
        sum[i % 2] ^= byte;
    }
    sum
}

impl FromStr for ToxId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != TOX_ID_SIZE * 2 {
            return Err(format!(
                "expected {} hex characters, got {}",
                TOX_ID_SIZE * 2,
                s.len()
            ));
        }
        let mut bytes = [0u8; TOX_ID_SIZE];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| format!("invalid hex: {e}"))?;
        let body = PUBLIC_KEY_SIZE + NOSPAM_SIZE;
        if checksum(&bytes[..body]) != bytes[body..] {
            return Err("checksum mismatch".to_string());
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for ToxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for ToxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ToxId({self})")
    }
}

/// Request sent to the Tox daemon.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Hello { nickname: &'a str, friend: String },
    Send {
        friend: String,
        kind: MessageKind,
        text: &'a str,
    },
    Bye,
}

/// Event reported by the Tox daemon.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeEvent {
    Ready,
    Error {
        reason: String,
    },
    Message {
        name: String,
        #[serde(default)]
        kind: MessageKind,
        text: String,
    },
    Online,
    Offline,
    #[serde(other)]
    Unknown,
}

fn encode(request: &BridgeRequest<'_>) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

/// Tox channel adapter.
pub struct ToxChannel {
    name: String,
    direction: Direction,
    /// The peer messages are relayed with.
    friend: ToxId,
    /// Address of the Tox daemon.
    bridge: String,
    nickname: String,
    connect_timeout: Duration,
    session: Mutex<Option<ToxSession>>,
    active: Arc<AtomicBool>,
}

struct ToxSession {
    write_tx: mpsc::Sender<Outgoing>,
    shutdown_tx: watch::Sender<bool>,
}

impl ToxChannel {
    pub const TYPE: &'static str = "tox";

    pub fn from_config(config: &ChannelConfig) -> Result<Self, ConfigError> {
        let friend = config
            .require("friend")?
            .parse::<ToxId>()
            .map_err(|reason| ConfigError::malformed(&config.name, "friend", reason))?;
        Ok(Self {
            name: config.name.clone(),
            direction: config.direction,
            friend,
            bridge: config.option_or("bridge", DEFAULT_BRIDGE),
            nickname: config.option_or("nickname", DEFAULT_NICKNAME),
            connect_timeout: Duration::from_millis(
                config.parse_or("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS)?,
            ),
            session: Mutex::new(None),
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn friend(&self) -> &ToxId {
        &self.friend
    }

    fn activate_error(&self, reason: impl Into<String>) -> ChannelError {
        ChannelError::activate(&self.name, reason)
    }

    /// Connect to the daemon and wait until it reports the friend reachable.
    async fn handshake(
        &self,
    ) -> Result<(Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf), ChannelError> {
        let stream = TcpStream::connect(&self.bridge).await.map_err(|e| {
            self.activate_error(format!("cannot reach Tox daemon at {}", self.bridge))
                .with_source(e)
        })?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let hello = encode(&BridgeRequest::Hello {
            nickname: &self.nickname,
            friend: self.friend.to_string(),
        })
        .map_err(|e| self.activate_error("cannot encode hello").with_source(e))?;
        writer
            .write_all(hello.as_bytes())
            .await
            .map_err(|e| self.activate_error("hello send failed").with_source(e))?;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(self.activate_error("Tox daemon closed the connection")),
                Err(e) => return Err(self.activate_error("read failed").with_source(e)),
            };
            match serde_json::from_str::<BridgeEvent>(&line) {
                Ok(BridgeEvent::Ready) => return Ok((lines, writer)),
                Ok(BridgeEvent::Error { reason }) => {
                    return Err(self.activate_error(format!("Tox daemon refused: {reason}")))
                }
                Ok(event) => trace!(channel = %self.name, "Tox event before ready: {event:?}"),
                Err(e) => warn!(channel = %self.name, "malformed Tox daemon line: {e}"),
            }
        }
    }
}

/// Request lines for one relayed message, split to the Tox length limit.
/// Every chunk carries the `[sender]: ` prefix.
fn send_requests(friend: &ToxId, message: &Message) -> Result<Vec<String>, serde_json::Error> {
    let prefix = format!("[{}]: ", message.user().name());
    let room = TOX_MAX_MESSAGE_LENGTH.saturating_sub(prefix.len());
    split_message(message.content(), room)
        .iter()
        .map(|chunk| {
            let text = format!("{prefix}{chunk}");
            encode(&BridgeRequest::Send {
                friend: friend.to_string(),
                kind: message.kind(),
                text: &text,
            })
        })
        .collect()
}

#[async_trait]
impl Channel for ToxChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        Self::TYPE
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    async fn activate(&self, inbound: Inbound) -> Result<(), ChannelError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let (lines, writer) = tokio::time::timeout(self.connect_timeout, self.handshake())
            .await
            .map_err(|_| {
                self.activate_error(format!(
                    "Tox daemon at {} not ready within {:?}",
                    self.bridge, self.connect_timeout
                ))
            })??;

        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.active.store(true, Ordering::SeqCst);
        tokio::spawn(run_session(
            self.name.clone(),
            lines,
            writer,
            inbound,
            write_rx,
            shutdown_rx,
            Arc::clone(&self.active),
        ));

        *session = Some(ToxSession {
            write_tx,
            shutdown_tx,
        });
        info!(channel = %self.name, friend = %self.friend, "Tox channel ready");
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let write_tx = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(s) if self.is_active() => s.write_tx.clone(),
                _ => return Err(ChannelError::connection(&self.name, "channel is not active")),
            }
        };

        let requests = send_requests(&self.friend, message).map_err(|e| {
            ChannelError::connection(&self.name, "cannot encode message").with_source(e)
        })?;
        for request in requests {
            session::write_line(&write_tx, &self.name, request).await?;
        }
        Ok(())
    }

    async fn deactivate(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        self.active.store(false, Ordering::SeqCst);
        let _ = session.shutdown_tx.send(true);
        info!(channel = %self.name, "Tox channel closed");
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

async fn run_session(
    name: String,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut writer: OwnedWriteHalf,
    inbound: Inbound,
    mut write_rx: mpsc::Receiver<Outgoing>,
    mut shutdown_rx: watch::Receiver<bool>,
    active: Arc<AtomicBool>,
) {
    let failure = loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                session::flush_pending(&mut write_rx, &mut writer, &name).await;
                say_bye(&mut writer).await;
                debug!(channel = %name, "Tox session stopped");
                return;
            }

            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break ChannelError::connection(&name, "Tox daemon closed the connection"),
                    Err(e) => break ChannelError::connection(&name, "read failed").with_source(e),
                };
                match serde_json::from_str::<BridgeEvent>(&line) {
                    Ok(BridgeEvent::Message { name: sender, kind, text }) => {
                        let message = Message::of_kind(kind, inbound.user(sender), text);
                        if !inbound.deliver(message).await {
                            active.store(false, Ordering::SeqCst);
                            session::flush_pending(&mut write_rx, &mut writer, &name).await;
                            say_bye(&mut writer).await;
                            return;
                        }
                    }
                    Ok(BridgeEvent::Offline) => {
                        break ChannelError::connection(&name, "friend went offline");
                    }
                    Ok(BridgeEvent::Error { reason }) => {
                        break ChannelError::connection(&name, format!("Tox daemon error: {reason}"));
                    }
                    Ok(event) => debug!(channel = %name, "Tox event: {event:?}"),
                    Err(e) => warn!(channel = %name, "malformed Tox daemon line: {e}"),
                }
            }

            Some(out) = write_rx.recv() => {
                if let Err(e) = session::write_one(&mut writer, out).await {
                    break ChannelError::connection(&name, "write failed").with_source(e);
                }
            }
        }
    };

    active.store(false, Ordering::SeqCst);
    warn!(channel = %name, error = %failure, "Tox connection lost");
    session::reject_pending(&mut write_rx, &name, failure.reason());
    inbound.fail(failure);
}

async fn say_bye(writer: &mut OwnedWriteHalf) {
    if let Ok(bye) = encode(&BridgeRequest::Bye) {
        let _ = writer.write_all(bye.as_bytes()).await;
    }
}
