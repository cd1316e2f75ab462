//! Integration tests for the relay hub.
//!
//! Mock channels record what the hub sends them and inject inbound traffic
//! through the `Inbound` handle they receive on activation, so the real
//! dispatcher, workers and retry policy are exercised end to end. The
//! File/IRC/Tox scenario runs the real adapters against local socket peers.

use async_trait::async_trait;
use chatsync_channels::tox::ToxId;
use chatsync_channels::{Channel, ChannelFactory, Inbound};
use chatsync_hub::{Hub, HubError, HubResult};
use chatsync_types::channel::{ChannelState, Direction};
use chatsync_types::config::{ChannelConfig, ChatsyncConfig, HubSettings, RetrySettings};
use chatsync_types::error::{ChannelError, ConfigError};
use chatsync_types::message::Message;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Mock channel
// ---------------------------------------------------------------------------

struct MockChannel {
    name: String,
    direction: Direction,
    sent: Mutex<Vec<Message>>,
    inbound: Mutex<Option<Inbound>>,
    active: AtomicBool,
    /// Sessions actually opened.
    connections: AtomicU32,
    /// Fail this many upcoming activations.
    fail_activations: AtomicU32,
    /// Fail this many upcoming sends.
    fail_sends: AtomicU32,
}

impl MockChannel {
    fn new(name: &str, direction: Direction) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            direction,
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(None),
            active: AtomicBool::new(false),
            connections: AtomicU32::new(0),
            fail_activations: AtomicU32::new(0),
            fail_sends: AtomicU32::new(0),
        })
    }

    fn both(name: &str) -> Arc<Self> {
        Self::new(name, Direction::Both)
    }

    /// Simulate a message typed by `user` on this channel's transport.
    async fn inject(&self, user: &str, text: &str) -> bool {
        let inbound = self.inbound.lock().unwrap().clone();
        match inbound {
            Some(inbound) => {
                let message = Message::text(inbound.user(user), text);
                inbound.deliver(message).await
            }
            None => false,
        }
    }

    /// Simulate the transport breaking underneath an active session.
    fn break_session(&self, reason: &str) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(inbound) = self.inbound.lock().unwrap().as_ref() {
            inbound.fail(ChannelError::connection(&self.name, reason));
        }
    }

    fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    /// Relayed messages, excluding hub notices, as display lines.
    fn relayed(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter(|m| !m.user().is_system())
            .map(ToString::to_string)
            .collect()
    }

    fn notices(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter(|m| m.user().is_system())
            .map(|m| m.content().to_string())
            .collect()
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &'static str {
        "mock"
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    async fn activate(&self, inbound: Inbound) -> Result<(), ChannelError> {
        if self.active.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self
            .fail_activations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChannelError::activate(&self.name, "endpoint unreachable"));
        }
        *self.inbound.lock().unwrap() = Some(inbound);
        self.connections.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(ChannelError::connection(&self.name, "channel is not active"));
        }
        if self
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChannelError::connection(&self.name, "send refused"));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        *self.inbound.lock().unwrap() = None;
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn quiet_settings() -> HubSettings {
    HubSettings {
        name: "test hub".to_string(),
        announce_lifecycle: false,
        shutdown_timeout_ms: 1_000,
        ..HubSettings::default()
    }
}

fn fast_retry(max_attempts: u32) -> RetrySettings {
    RetrySettings {
        max_attempts,
        min_delay_ms: 10,
        max_delay_ms: 50,
        jitter: 0.0,
    }
}

async fn start_hub(
    settings: HubSettings,
    retry: RetrySettings,
    channels: &[Arc<MockChannel>],
) -> Hub {
    let mut hub = Hub::new(settings, retry);
    for channel in channels {
        hub.add_channel(channel.clone()).await.unwrap();
    }
    hub.start().await.unwrap();
    hub
}

async fn wait_active(hub: &Hub, names: &[&str]) {
    for name in names {
        assert!(
            hub.wait_for_state(name, ChannelState::Active, WAIT).await,
            "channel {name} never became active"
        );
    }
}

/// Poll `condition` until it holds or the wait times out.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Let in-flight relays settle before asserting that something did NOT happen.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

// ---------------------------------------------------------------------------
// Relay properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_fan_out_without_echo() {
    let (a, b, c) = (MockChannel::both("a"), MockChannel::both("b"), MockChannel::both("c"));
    let mut hub = start_hub(quiet_settings(), fast_retry(3), &[a.clone(), b.clone(), c.clone()]).await;
    wait_active(&hub, &["a", "b", "c"]).await;

    assert!(a.inject("alice", "hello").await);
    assert!(eventually(|| b.sent().len() == 1 && c.sent().len() == 1).await);
    settle().await;

    assert!(a.sent().is_empty(), "message echoed to its origin");
    assert_eq!(b.relayed(), vec!["alice: hello"]);
    assert_eq!(c.relayed(), vec!["alice: hello"]);
    assert_eq!(hub.sequence(), 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_relay_preserves_order_per_source() {
    let (a, b, c) = (MockChannel::both("a"), MockChannel::both("b"), MockChannel::both("c"));
    let mut hub = start_hub(quiet_settings(), fast_retry(3), &[a.clone(), b.clone(), c.clone()]).await;
    wait_active(&hub, &["a", "b", "c"]).await;

    for i in 0..50 {
        assert!(a.inject("alice", &format!("m{i}")).await);
    }
    assert!(eventually(|| b.sent().len() == 50 && c.sent().len() == 50).await);

    let expected: Vec<String> = (0..50).map(|i| format!("alice: m{i}")).collect();
    assert_eq!(b.relayed(), expected);
    assert_eq!(c.relayed(), expected);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_send_failure_is_isolated() {
    let (a, b, c) = (MockChannel::both("a"), MockChannel::both("b"), MockChannel::both("c"));
    let mut hub = start_hub(quiet_settings(), fast_retry(3), &[a.clone(), b.clone(), c.clone()]).await;
    wait_active(&hub, &["a", "b", "c"]).await;

    b.fail_sends.store(1, Ordering::SeqCst);
    assert!(a.inject("alice", "first").await);

    assert!(eventually(|| c.sent().len() == 1).await);
    assert_eq!(c.relayed(), vec!["alice: first"]);
    assert!(b.relayed().is_empty());

    // b fails, is retried and comes back; a and c never notice.
    assert!(eventually(|| b.connections.load(Ordering::SeqCst) == 2).await);
    wait_active(&hub, &["b"]).await;
    assert_eq!(a.connections.load(Ordering::SeqCst), 1);
    assert_eq!(c.connections.load(Ordering::SeqCst), 1);

    let status = hub.status().await;
    assert_eq!(status[0].failures, 0);
    assert_eq!(status[1].failures, 1);
    assert_eq!(status[2].failures, 0);

    assert!(a.inject("alice", "second").await);
    assert!(eventually(|| b.relayed().len() == 1 && c.relayed().len() == 2).await);
    assert_eq!(b.relayed(), vec!["alice: second"]);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_direction_filtering() {
    let reader = MockChannel::new("reader", Direction::Input);
    let writer = MockChannel::new("writer", Direction::Output);
    let chat = MockChannel::both("chat");
    let mut hub = start_hub(
        quiet_settings(),
        fast_retry(3),
        &[reader.clone(), writer.clone(), chat.clone()],
    )
    .await;
    wait_active(&hub, &["reader", "writer", "chat"]).await;

    // Output-only channels do not feed the hub.
    assert!(writer.inject("bob", "ignored").await);
    settle().await;
    assert_eq!(hub.sequence(), 0);
    assert!(chat.sent().is_empty());

    assert!(reader.inject("feed", "news").await);
    assert!(eventually(|| writer.sent().len() == 1 && chat.sent().len() == 1).await);

    // Input-only channels never receive.
    assert!(chat.inject("carol", "reply").await);
    assert!(eventually(|| writer.sent().len() == 2).await);
    settle().await;
    assert!(reader.sent().is_empty());

    hub.shutdown().await;
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_activation_is_idempotent() {
    let a = MockChannel::both("a");
    let b = MockChannel::both("b");
    let mut hub = start_hub(quiet_settings(), fast_retry(3), &[a.clone(), b.clone()]).await;
    wait_active(&hub, &["a", "b"]).await;

    let (tx, _rx) = tokio::sync::mpsc::channel(1);
    let (fail_tx, _fail_rx) = tokio::sync::mpsc::channel(1);
    let extra = Inbound::new(a.id(), tx, fail_tx);
    assert_ok!(a.activate(extra).await);
    assert_eq!(a.connections.load(Ordering::SeqCst), 1);

    // The hub still talks to the first session.
    assert!(a.inject("alice", "still here").await);
    assert!(eventually(|| b.sent().len() == 1).await);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_activation_retried_with_backoff() {
    let a = MockChannel::both("a");
    let flaky = MockChannel::both("flaky");
    flaky.fail_activations.store(2, Ordering::SeqCst);
    let mut hub = start_hub(quiet_settings(), fast_retry(5), &[a.clone(), flaky.clone()]).await;

    wait_active(&hub, &["a", "flaky"]).await;
    assert_eq!(flaky.connections.load(Ordering::SeqCst), 1);
    let status = hub.status().await;
    assert_eq!(status[1].failures, 2);
    assert_eq!(status[1].state, ChannelState::Active);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_channel_removed_after_exhausted_retries() {
    let a = MockChannel::both("a");
    let b = MockChannel::both("b");
    let dead = MockChannel::both("dead");
    dead.fail_activations.store(u32::MAX, Ordering::SeqCst);
    let mut hub = start_hub(
        quiet_settings(),
        fast_retry(3),
        &[a.clone(), b.clone(), dead.clone()],
    )
    .await;

    assert!(hub.wait_for_state("dead", ChannelState::Removed, WAIT).await);
    let status = hub.status().await;
    assert_eq!(status[2].failures, 3);
    assert_eq!(dead.connections.load(Ordering::SeqCst), 0);

    // The survivors keep talking.
    wait_active(&hub, &["a", "b"]).await;
    assert!(a.inject("alice", "anyone?").await);
    assert!(eventually(|| b.sent().len() == 1).await);
    assert!(dead.sent().is_empty());

    hub.shutdown().await;
    assert_eq!(hub.channel_state("dead").await, Some(ChannelState::Removed));
}

#[tokio::test]
async fn test_adapter_reported_failure_reconnects() {
    let a = MockChannel::both("a");
    let b = MockChannel::both("b");
    let mut hub = start_hub(quiet_settings(), fast_retry(3), &[a.clone(), b.clone()]).await;
    wait_active(&hub, &["a", "b"]).await;

    b.break_session("socket closed");
    assert!(eventually(|| b.connections.load(Ordering::SeqCst) == 2).await);
    wait_active(&hub, &["b"]).await;
    assert_eq!(hub.status().await[1].failures, 1);

    assert!(a.inject("alice", "welcome back").await);
    assert!(eventually(|| b.sent().len() == 1).await);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_notices() {
    let a = MockChannel::both("a");
    let b = MockChannel::both("b");
    let settings = HubSettings {
        announce_lifecycle: true,
        ..quiet_settings()
    };
    let mut hub = start_hub(settings, fast_retry(3), &[a.clone(), b.clone()]).await;
    wait_active(&hub, &["a", "b"]).await;

    b.break_session("ping timeout");
    let reconnected = || {
        let notices = a.notices();
        notices
            .iter()
            .position(|n| n == "channel b disconnected: ping timeout")
            .is_some_and(|i| notices[i + 1..].iter().any(|n| n == "channel b connected"))
    };
    assert!(eventually(reconnected).await);

    // A channel never hears about itself.
    settle().await;
    assert!(b.notices().iter().all(|n| !n.starts_with("channel b ")));
    assert!(a.notices().iter().all(|n| !n.starts_with("channel a ")));

    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_deactivates_every_channel() {
    let a = MockChannel::both("a");
    let b = MockChannel::both("b");
    let mut hub = start_hub(quiet_settings(), fast_retry(3), &[a.clone(), b.clone()]).await;
    wait_active(&hub, &["a", "b"]).await;
    assert!(hub.is_running());

    hub.shutdown().await;
    assert!(!hub.is_running());
    assert!(!a.is_active());
    assert!(!b.is_active());
    for status in hub.status().await {
        assert_eq!(status.state, ChannelState::Inactive);
    }

    // Shutting down twice is harmless.
    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_relays_pending_inbound() {
    let a = MockChannel::both("a");
    let b = MockChannel::both("b");
    let mut hub = start_hub(quiet_settings(), fast_retry(3), &[a.clone(), b.clone()]).await;
    wait_active(&hub, &["a", "b"]).await;

    for i in 0..10 {
        assert!(a.inject("alice", &format!("late {i}")).await);
    }
    hub.shutdown().await;
    assert_eq!(b.relayed().len(), 10);
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_start_errors() {
    let mut empty = Hub::new(quiet_settings(), fast_retry(3));
    assert!(matches!(empty.start().await, Err(HubError::NoChannels(_))));

    let mut hub = Hub::new(quiet_settings(), fast_retry(3));
    hub.add_channel(MockChannel::both("a")).await.unwrap();

    let duplicate = hub.add_channel(MockChannel::both("a")).await;
    assert!(matches!(
        duplicate,
        Err(HubError::Config(ConfigError::DuplicateChannel(_)))
    ));
    let reserved = hub.add_channel(MockChannel::both("hub")).await;
    assert!(matches!(
        reserved,
        Err(HubError::Config(ConfigError::InvalidName(_)))
    ));

    assert_ok!(hub.start().await);
    assert!(matches!(hub.start().await, Err(HubError::AlreadyStarted)));
    assert_err!(hub.add_channel(MockChannel::both("late")).await);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_from_config_partial_startup() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.txt");
    let config = ChatsyncConfig {
        hub: quiet_settings(),
        retry: fast_retry(3),
        channels: vec![
            ChannelConfig::new("file", "log", Direction::Output)
                .with_option("path", log.to_string_lossy().to_string()),
            ChannelConfig::new("bogus", "nope", Direction::Both),
            ChannelConfig::new("file", "log", Direction::Output).with_option("path", "other.txt"),
            ChannelConfig::new("irc", "libera", Direction::Both),
        ],
    };

    let (hub, rejected) = Hub::from_config(&config, &ChannelFactory::with_builtin())
        .await
        .unwrap();
    assert_eq!(rejected.len(), 3);
    assert!(matches!(rejected[0], ConfigError::UnknownChannelType(ref t) if t == "bogus"));
    assert!(matches!(rejected[1], ConfigError::DuplicateChannel(ref n) if n == "log"));
    assert!(matches!(rejected[2], ConfigError::MissingOption { .. }));

    let status = hub.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].name, "log");
    assert_eq!(status[0].channel_type, "file");
    assert_eq!(status[0].state, ChannelState::Inactive);
}

#[tokio::test]
async fn test_from_config_rejects_bad_settings() {
    let config = ChatsyncConfig {
        retry: RetrySettings {
            max_attempts: 0,
            ..RetrySettings::default()
        },
        ..ChatsyncConfig::default()
    };
    let result = Hub::from_config(&config, &ChannelFactory::with_builtin()).await;
    assert!(matches!(result, Err(HubError::Config(ConfigError::Setting { .. }))));
}

#[tokio::test]
async fn test_custom_channel_type() -> HubResult<()> {
    let mut factory = ChannelFactory::with_builtin();
    factory.register("mock", |config: &ChannelConfig| {
        Ok(MockChannel::new(&config.name, config.direction) as Arc<dyn Channel>)
    })?;
    let again = factory.register("mock", |config: &ChannelConfig| {
        Ok(MockChannel::new(&config.name, config.direction) as Arc<dyn Channel>)
    });
    assert!(matches!(
        again.map_err(HubError::from),
        Err(HubError::Registry(_))
    ));

    let config = ChatsyncConfig {
        hub: quiet_settings(),
        retry: fast_retry(3),
        channels: vec![
            ChannelConfig::new("mock", "one", Direction::Both),
            ChannelConfig::new("mock", "two", Direction::Both),
        ],
    };
    let (mut hub, rejected) = Hub::from_config(&config, &factory).await?;
    assert!(rejected.is_empty());
    hub.start().await?;
    wait_active(&hub, &["one", "two"]).await;

    let json = serde_json::to_value(hub.status().await).unwrap();
    assert_eq!(json[0]["name"], "one");
    assert_eq!(json[0]["state"], "active");
    assert_eq!(json[1]["direction"], "both");

    hub.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// File / IRC / Tox scenarios
// ---------------------------------------------------------------------------

fn read_log(path: &PathBuf) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

/// A line-oriented peer on a local socket: reads client lines until one
/// contains `greeting_after`, answers with `greeting`, then forwards every
/// client line to `seen` and writes whatever arrives on `say`.
async fn fake_peer(
    listener: TcpListener,
    greeting_after: &'static str,
    greeting: &'static str,
    seen: mpsc::UnboundedSender<String>,
    mut say: mpsc::UnboundedReceiver<String>,
) {
    let (stream, _) = listener.accept().await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains(greeting_after) {
            break;
        }
    }
    writer.write_all(greeting.as_bytes()).await.unwrap();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let _ = seen.send(line);
                }
                _ => return,
            },
            Some(out) = say.recv() => {
                if writer.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn next_seen(seen: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, seen.recv())
        .await
        .expect("peer saw nothing")
        .expect("peer hung up")
}

#[tokio::test]
async fn test_file_irc_tox_relay() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.txt");

    let irc_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let irc_port = irc_listener.local_addr().unwrap().port();
    let (irc_seen_tx, mut irc_seen) = mpsc::unbounded_channel();
    let (irc_say, irc_say_rx) = mpsc::unbounded_channel();
    tokio::spawn(fake_peer(
        irc_listener,
        "USER ",
        ":srv 001 chatsyncbot :Welcome\r\n",
        irc_seen_tx,
        irc_say_rx,
    ));

    let tox_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let tox_addr = tox_listener.local_addr().unwrap().to_string();
    let (tox_seen_tx, mut tox_seen) = mpsc::unbounded_channel();
    let (tox_say, tox_say_rx) = mpsc::unbounded_channel();
    tokio::spawn(fake_peer(
        tox_listener,
        "\"hello\"",
        "{\"type\":\"ready\"}\n",
        tox_seen_tx,
        tox_say_rx,
    ));

    let friend = ToxId::from_parts([7; 32], [1, 2, 3, 4]);
    let config = ChatsyncConfig {
        hub: quiet_settings(),
        retry: fast_retry(3),
        channels: vec![
            ChannelConfig::new("file", "file", Direction::Output)
                .with_option("path", log.to_string_lossy().to_string()),
            ChannelConfig::new("irc", "irc", Direction::Both)
                .with_option("server", "127.0.0.1")
                .with_option("port", i64::from(irc_port))
                .with_option("channel", "room"),
            ChannelConfig::new("tox", "tox", Direction::Both)
                .with_option("friend", friend.to_string())
                .with_option("bridge", tox_addr),
        ],
    };
    let (mut hub, rejected) = Hub::from_config(&config, &ChannelFactory::with_builtin())
        .await
        .unwrap();
    assert!(rejected.is_empty());
    hub.start().await.unwrap();
    wait_active(&hub, &["file", "irc", "tox"]).await;
    assert_eq!(next_seen(&mut irc_seen).await, "JOIN #room");

    // IRC -> file + Tox
    irc_say
        .send(":alice!a@host PRIVMSG #room :hello\r\n".to_string())
        .unwrap();
    let request: serde_json::Value = serde_json::from_str(&next_seen(&mut tox_seen).await).unwrap();
    assert_eq!(request["type"], "send");
    assert_eq!(request["friend"], friend.to_string());
    assert_eq!(request["text"], "[alice]: hello");
    assert!(eventually(|| read_log(&log) == "alice: hello\n").await);

    // Tox -> file + IRC
    tox_say
        .send("{\"type\":\"message\",\"name\":\"carol\",\"text\":\"hi there\"}\n".to_string())
        .unwrap();
    assert_eq!(next_seen(&mut irc_seen).await, "PRIVMSG #room :[carol]: hi there");
    assert!(eventually(|| read_log(&log) == "alice: hello\ncarol: hi there\n").await);

    // Nothing echoed back to its origin.
    settle().await;
    assert!(irc_seen.try_recv().is_err());
    assert!(tox_seen.try_recv().is_err());

    hub.shutdown().await;
    assert_eq!(next_seen(&mut irc_seen).await, "QUIT :chatsync shutting down");
    let bye: serde_json::Value = serde_json::from_str(&next_seen(&mut tox_seen).await).unwrap();
    assert_eq!(bye["type"], "bye");
    assert_eq!(read_log(&log), "alice: hello\ncarol: hi there\n");
}

#[tokio::test]
async fn test_tox_send_failure_then_recovery() {
    let file = MockChannel::new("file", Direction::Output);
    let irc = MockChannel::both("irc");
    let tox = MockChannel::both("tox");
    let retry = RetrySettings {
        max_attempts: 3,
        min_delay_ms: 300,
        max_delay_ms: 300,
        jitter: 0.0,
    };
    let mut hub = start_hub(quiet_settings(), retry, &[file.clone(), irc.clone(), tox.clone()]).await;
    wait_active(&hub, &["file", "irc", "tox"]).await;

    tox.fail_sends.store(1, Ordering::SeqCst);
    assert!(irc.inject("alice", "one").await);
    assert!(eventually(|| file.sent().len() == 1).await);
    assert!(hub.wait_for_state("tox", ChannelState::Retrying, WAIT).await);
    assert!(tox.relayed().is_empty());

    // While tox waits to retry, relays reach only the file log.
    assert!(irc.inject("alice", "two").await);
    assert!(eventually(|| file.sent().len() == 2).await);
    assert!(tox.relayed().is_empty());

    wait_active(&hub, &["tox"]).await;
    assert!(irc.inject("alice", "three").await);
    assert!(eventually(|| tox.relayed() == vec!["alice: three"]).await);
    assert_eq!(file.relayed(), vec!["alice: one", "alice: two", "alice: three"]);

    hub.shutdown().await;
}
