//! IRC channel adapter.
//!
//! Speaks the plaintext IRC protocol over `tokio::net::TcpStream`: registers
//! with NICK/USER (and PASS when a password is configured), joins one channel
//! and relays its PRIVMSG traffic. Keepalive is a client PING every
//! `ping_interval_secs`; a server silent for five intervals is treated as a
//! broken connection.

use crate::session::{self, Outgoing, WRITE_QUEUE};
use crate::types::{split_message, Channel, Inbound};
use async_trait::async_trait;
use chatsync_types::channel::Direction;
use chatsync_types::config::ChannelConfig;
use chatsync_types::error::{ChannelError, ConfigError};
use chatsync_types::message::{Message, MessageBody, MessageKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

/// Maximum IRC line length per RFC 2812, CRLF included.
const MAX_LINE_LEN: usize = 512;

/// Silent ping intervals tolerated before the connection is declared dead.
const STALE_INTERVALS: u32 = 5;

const DEFAULT_PORT: u16 = 6667;
const DEFAULT_NICKNAME: &str = "chatsyncbot";
const DEFAULT_REALNAME: &str = "Chat Sync";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PING_INTERVAL_SECS: u64 = 60;

/// IRC channel adapter.
pub struct IrcChannel {
    name: String,
    direction: Direction,
    /// IRC server hostname.
    server: String,
    port: u16,
    /// Joined IRC channel, always with its leading `#`.
    channel: String,
    nickname: String,
    login: String,
    realname: String,
    /// User mode sent in the USER command.
    mode: String,
    /// SECURITY: services password, zeroized on drop.
    password: Option<Zeroizing<String>>,
    connect_timeout: Duration,
    ping_interval: Duration,
    session: Mutex<Option<IrcSession>>,
    active: Arc<AtomicBool>,
}

/// Handles to a registered connection.
struct IrcSession {
    write_tx: mpsc::Sender<Outgoing>,
    shutdown_tx: watch::Sender<bool>,
}

/// Connection state after the server welcomed us.
struct Registered {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    nick: String,
}

impl IrcChannel {
    pub const TYPE: &'static str = "irc";

    /// Build from configuration options.
    ///
    /// `server` and `channel` are required; see the crate docs for the rest.
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ConfigError> {
        let server = config.require("server")?;
        let channel = config.require("channel")?;
        let channel = if channel.starts_with('#') {
            channel
        } else {
            format!("#{channel}")
        };
        if channel.len() < 2 || channel.contains(char::is_whitespace) {
            return Err(ConfigError::malformed(
                &config.name,
                "channel",
                format!("'{channel}' is not a valid IRC channel"),
            ));
        }

        let nickname = config.option_or("nickname", DEFAULT_NICKNAME);
        let login = config.option_or("login", &nickname);
        let ping_secs = config.parse_or::<u64>("ping_interval_secs", DEFAULT_PING_INTERVAL_SECS)?;
        if ping_secs == 0 {
            return Err(ConfigError::malformed(
                &config.name,
                "ping_interval_secs",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            name: config.name.clone(),
            direction: config.direction,
            server,
            port: config.parse_or("port", DEFAULT_PORT)?,
            channel,
            nickname,
            login,
            realname: config.option_or("realname", DEFAULT_REALNAME),
            mode: config.option_or("mode", "0"),
            password: config
                .option("password")
                .filter(|p| !p.is_empty())
                .map(Zeroizing::new),
            connect_timeout: Duration::from_millis(
                config.parse_or("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS)?,
            ),
            ping_interval: Duration::from_secs(ping_secs),
            session: Mutex::new(None),
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Format the server address as `host:port`.
    fn addr(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// PASS, NICK and USER lines.
    fn registration(&self, nick: &str) -> Zeroizing<String> {
        let mut lines = Zeroizing::new(String::new());
        if let Some(password) = &self.password {
            lines.push_str(&format!("PASS {}:{}\r\n", self.login, password.as_str()));
        }
        lines.push_str(&format!("NICK {nick}\r\n"));
        lines.push_str(&format!(
            "USER {} {} * :{}\r\n",
            self.login, self.mode, self.realname
        ));
        lines
    }

    fn activate_error(&self, reason: impl Into<String>) -> ChannelError {
        ChannelError::activate(&self.name, reason)
    }

    /// Connect, register and join. Waits for RPL_WELCOME (001), answering
    /// PINGs and nickname collisions meanwhile.
    async fn register(&self) -> Result<Registered, ChannelError> {
        let addr = self.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| self.activate_error(format!("cannot connect to {addr}")).with_source(e))?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut nick = self.nickname.clone();

        let write_failed =
            |e: std::io::Error| self.activate_error("registration send failed").with_source(e);

        writer
            .write_all(self.registration(&nick).as_bytes())
            .await
            .map_err(write_failed)?;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    return Err(self.activate_error("server closed the connection during registration"))
                }
                Err(e) => return Err(self.activate_error("read failed").with_source(e)),
            };
            trace!(channel = %self.name, "IRC < {line}");

            let Some(parsed) = parse_irc_line(&line) else {
                continue;
            };
            match parsed.command.as_str() {
                "PING" => {
                    let pong = format!("PONG :{}\r\n", parsed.argument());
                    writer.write_all(pong.as_bytes()).await.map_err(write_failed)?;
                }
                // RPL_WELCOME
                "001" => break,
                // ERR_NICKNAMEINUSE
                "433" => {
                    warn!(channel = %self.name, "IRC nickname '{nick}' is already in use");
                    nick.push('_');
                    let cmd = format!("NICK {nick}\r\n");
                    writer.write_all(cmd.as_bytes()).await.map_err(write_failed)?;
                }
                // ERR_NOTREGISTERED
                "451" => {
                    writer
                        .write_all(self.registration(&nick).as_bytes())
                        .await
                        .map_err(write_failed)?;
                }
                // ERR_PASSWDMISMATCH, ERR_YOUREBANNEDCREEP
                "464" | "465" => {
                    return Err(self.activate_error(format!(
                        "server rejected login: {}",
                        parsed.argument()
                    )))
                }
                "ERROR" => {
                    return Err(self.activate_error(format!(
                        "server error: {}",
                        parsed.argument()
                    )))
                }
                _ => {}
            }
        }

        info!(channel = %self.name, server = %addr, "IRC registered as {nick}");

        if let Some(password) = &self.password {
            let identify = Zeroizing::new(format!("PRIVMSG NickServ :id {}\r\n", password.as_str()));
            writer.write_all(identify.as_bytes()).await.map_err(write_failed)?;
        }
        let join = format!("JOIN {}\r\n", self.channel);
        writer.write_all(join.as_bytes()).await.map_err(write_failed)?;

        Ok(Registered {
            lines,
            writer,
            nick,
        })
    }
}

#[async_trait]
impl Channel for IrcChannel {
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

        let registered = tokio::time::timeout(self.connect_timeout, self.register())
            .await
            .map_err(|_| {
                self.activate_error(format!(
                    "no welcome from {} within {:?}",
                    self.addr(),
                    self.connect_timeout
                ))
            })??;

        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = SessionTask {
            name: self.name.clone(),
            server: self.server.clone(),
            channel: self.channel.clone(),
            registration: self.registration(&registered.nick),
            ping_interval: self.ping_interval,
            inbound,
            active: Arc::clone(&self.active),
        };
        self.active.store(true, Ordering::SeqCst);
        tokio::spawn(task.run(registered, write_rx, shutdown_rx));

        *session = Some(IrcSession {
            write_tx,
            shutdown_tx,
        });
        info!(channel = %self.name, "IRC joined {}", self.channel);
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

        for line in format_privmsg(&self.channel, message) {
            session::write_line(&write_tx, &self.name, line).await?;
        }
        Ok(())
    }

    async fn deactivate(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        self.active.store(false, Ordering::SeqCst);
        let _ = session.shutdown_tx.send(true);
        info!(channel = %self.name, "IRC channel closed");
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// State owned by the connection task.
struct SessionTask {
    name: String,
    server: String,
    channel: String,
    registration: Zeroizing<String>,
    ping_interval: Duration,
    inbound: Inbound,
    active: Arc<AtomicBool>,
}

impl SessionTask {
    async fn run(
        self,
        registered: Registered,
        mut write_rx: mpsc::Receiver<Outgoing>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let Registered {
            mut lines,
            mut writer,
            nick,
        } = registered;
        let stale_after = self.ping_interval * STALE_INTERVALS;
        let mut ping = tokio::time::interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        let mut last_seen = Instant::now();

        let failure = loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    session::flush_pending(&mut write_rx, &mut writer, &self.name).await;
                    let _ = writer.write_all(b"QUIT :chatsync shutting down\r\n").await;
                    debug!(channel = %self.name, "IRC session stopped");
                    return;
                }

                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break ChannelError::connection(&self.name, "server closed the connection"),
                        Err(e) => break ChannelError::connection(&self.name, "read failed").with_source(e),
                    };
                    last_seen = Instant::now();
                    trace!(channel = %self.name, "IRC < {line}");

                    let Some(parsed) = parse_irc_line(&line) else {
                        continue;
                    };
                    let reply = match parsed.command.as_str() {
                        "PING" => Some(Zeroizing::new(format!("PONG :{}\r\n", parsed.argument()))),
                        "451" => {
                            warn!(channel = %self.name, "IRC server says we are not registered, registering again");
                            Some(self.registration.clone())
                        }
                        "ERROR" => {
                            break ChannelError::connection(
                                &self.name,
                                format!("server error: {}", parsed.argument()),
                            );
                        }
                        "PRIVMSG" => {
                            if let Some((sender, kind, text)) = parse_privmsg(&parsed, &nick, &self.channel) {
                                debug!(channel = %self.name, "IRC message from {sender}");
                                let message = Message::of_kind(kind, self.inbound.user(sender), text);
                                if !self.inbound.deliver(message).await {
                                    self.active.store(false, Ordering::SeqCst);
                                    session::flush_pending(&mut write_rx, &mut writer, &self.name).await;
                                    let _ = writer.write_all(b"QUIT :chatsync shutting down\r\n").await;
                                    return;
                                }
                            }
                            None
                        }
                        "JOIN" => {
                            if let Some(prefix) = &parsed.prefix {
                                debug!(channel = %self.name, "IRC {} joined", nick_from_prefix(prefix));
                            }
                            None
                        }
                        _ => None,
                    };
                    if let Some(reply) = reply {
                        if let Err(e) = writer.write_all(reply.as_bytes()).await {
                            break ChannelError::connection(&self.name, "write failed").with_source(e);
                        }
                    }
                }

                Some(out) = write_rx.recv() => {
                    trace!(channel = %self.name, "IRC > {}", out.line.trim_end());
                    if let Err(e) = session::write_one(&mut writer, out).await {
                        break ChannelError::connection(&self.name, "write failed").with_source(e);
                    }
                }

                _ = ping.tick() => {
                    if last_seen.elapsed() > stale_after {
                        break ChannelError::connection(
                            &self.name,
                            format!("no traffic from {} for {:?}", self.server, stale_after),
                        );
                    }
                    let cmd = format!("PING :{}\r\n", self.server);
                    if let Err(e) = writer.write_all(cmd.as_bytes()).await {
                        break ChannelError::connection(&self.name, "ping failed").with_source(e);
                    }
                }
            }
        };

        self.active.store(false, Ordering::SeqCst);
        warn!(channel = %self.name, error = %failure, "IRC connection lost");
        session::reject_pending(&mut write_rx, &self.name, failure.reason());
        self.inbound.fail(failure);
    }
}

/// An IRC protocol line parsed into its components.
#[derive(Debug)]
struct IrcLine {
    /// Optional prefix (e.g., "nick!user@host").
    prefix: Option<String>,
    /// The IRC command (e.g., "PRIVMSG", "PING", "001").
    command: String,
    params: Vec<String>,
    /// Trailing parameter (after ` :`).
    trailing: Option<String>,
}

impl IrcLine {
    /// Trailing parameter, or the first plain one.
    fn argument(&self) -> &str {
        self.trailing
            .as_deref()
            .or(self.params.first().map(String::as_str))
            .unwrap_or("")
    }
}

/// Parse a raw IRC line: `[:prefix] COMMAND [params...] [:trailing]`.
fn parse_irc_line(line: &str) -> Option<IrcLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let mut remaining = line;
    let prefix = if let Some(rest) = remaining.strip_prefix(':') {
        let space = rest.find(' ')?;
        let pfx = rest[..space].to_string();
        remaining = &rest[space + 1..];
        Some(pfx)
    } else {
        None
    };

    let (main_part, trailing) = if let Some(rest) = remaining.strip_prefix(':') {
        ("", Some(rest.to_string()))
    } else if let Some(idx) = remaining.find(" :") {
        (&remaining[..idx], Some(remaining[idx + 2..].to_string()))
    } else {
        (remaining, None)
    };

    let mut parts = main_part.split_whitespace();
    let command = parts.next()?.to_ascii_uppercase();
    let params = parts.map(String::from).collect();

    Some(IrcLine {
        prefix,
        command,
        params,
        trailing,
    })
}

/// Extract the nickname from an IRC prefix like "nick!user@host".
fn nick_from_prefix(prefix: &str) -> &str {
    prefix.split('!').next().unwrap_or(prefix)
}

/// Extract `(sender, kind, text)` from a PRIVMSG to our channel.
///
/// Messages from ourselves, to other targets, empty ones and CTCP requests
/// other than ACTION are ignored.
fn parse_privmsg(
    line: &IrcLine,
    own_nick: &str,
    channel: &str,
) -> Option<(String, MessageKind, String)> {
    if line.command != "PRIVMSG" {
        return None;
    }
    let sender = nick_from_prefix(line.prefix.as_deref()?);
    if sender.eq_ignore_ascii_case(own_nick) {
        return None;
    }
    if !line.params.first()?.eq_ignore_ascii_case(channel) {
        return None;
    }

    let text = line.trailing.as_deref().unwrap_or("");
    if let Some(ctcp) = text.strip_prefix('\x01') {
        let ctcp = ctcp.strip_suffix('\x01').unwrap_or(ctcp);
        let action = ctcp.strip_prefix("ACTION ")?;
        return Some((sender.to_string(), MessageKind::Action, action.to_string()));
    }
    if text.is_empty() {
        return None;
    }
    Some((sender.to_string(), MessageKind::Text, text.to_string()))
}

/// Render a message as PRIVMSG lines no longer than [`MAX_LINE_LEN`].
///
/// Text is split on whitespace across several lines; an action is a single
/// CTCP ACTION line, truncated to fit.
fn format_privmsg(channel: &str, message: &Message) -> Vec<String> {
    let sender = message.user().name().replace(['\r', '\n'], " ");
    match message.body() {
        MessageBody::Text(text) => {
            let text = text.replace(['\r', '\n'], " ");
            let prefix = format!("PRIVMSG {channel} :[{sender}]: ");
            let room = MAX_LINE_LEN.saturating_sub(prefix.len() + 2);
            split_message(&text, room)
                .into_iter()
                .map(|chunk| format!("{prefix}{chunk}\r\n"))
                .collect()
        }
        MessageBody::Action(text) => {
            let sender = sender.replace('\x01', "");
            let text = text.replace(['\r', '\n'], " ").replace('\x01', "");
            let prefix = format!("PRIVMSG {channel} :\x01ACTION [{sender}]: ");
            let room = MAX_LINE_LEN.saturating_sub(prefix.len() + 3);
            vec![format!("{prefix}{}\x01\r\n", truncate(&text, room))]
        }
    }
}

fn truncate(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}
