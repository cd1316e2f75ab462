//! The relay hub.
//!
//! Every channel runs on its own worker task, which activates it, feeds it
//! relayed messages from a bounded FIFO queue and applies the retry policy
//! when it fails. A single dispatcher task consumes inbound messages from all
//! channels, numbers them and pushes them onto the queue of every other
//! active output channel. Per-destination queues keep relay order per source
//! while sends to different destinations proceed independently.

use crate::error::{HubError, HubResult};
use crate::worker::{Notice, Worker};
use chatsync_channels::{Channel, ChannelFactory, InboundMessage};
use chatsync_types::channel::{ChannelId, ChannelState, Direction};
use chatsync_types::config::{ChannelConfig, ChatsyncConfig, HubSettings, RetrySettings};
use chatsync_types::error::ConfigError;
use chatsync_types::message::{Message, User};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the lifecycle notice queue.
const NOTICE_CAPACITY: usize = 64;

/// Extra time granted to workers beyond the flush timeout before they are
/// aborted.
const JOIN_GRACE: Duration = Duration::from_millis(500);

/// A relayed message queued for one destination.
#[derive(Debug, Clone)]
pub(crate) struct Dispatch {
    pub seq: u64,
    pub origin: ChannelId,
    pub message: Arc<Message>,
}

/// Point-in-time view of one managed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub channel_type: String,
    pub direction: Direction,
    pub state: ChannelState,
    /// Failed activations and broken sessions since the hub started.
    pub failures: u32,
}

struct Slot {
    id: ChannelId,
    channel: Arc<dyn Channel>,
    state: ChannelState,
    failures: u32,
    outbound: Option<mpsc::Sender<Dispatch>>,
}

/// Channel registry shared by the hub, its dispatcher and its workers.
#[derive(Default)]
pub(crate) struct Registry {
    slots: RwLock<Vec<Slot>>,
}

impl Registry {
    pub(crate) async fn set_state(&self, id: &ChannelId, state: ChannelState) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.iter_mut().find(|s| &s.id == id) {
            if slot.state != state {
                debug!(channel = %id, from = %slot.state, to = %state, "channel state changed");
                slot.state = state;
            }
        }
    }

    pub(crate) async fn record_failure(&self, id: &ChannelId) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.iter_mut().find(|s| &s.id == id) {
            slot.failures = slot.failures.saturating_add(1);
        }
    }

    async fn direction(&self, id: &ChannelId) -> Option<Direction> {
        let slots = self.slots.read().await;
        slots
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.channel.direction())
    }

    /// Queues of every active output channel other than `origin` and
    /// `exclude`, in registration order.
    async fn destinations(
        &self,
        origin: &ChannelId,
        exclude: Option<&ChannelId>,
    ) -> Vec<(ChannelId, mpsc::Sender<Dispatch>)> {
        let slots = self.slots.read().await;
        slots
            .iter()
            .filter(|s| s.state.is_active())
            .filter(|s| s.channel.direction().can_output())
            .filter(|s| &s.id != origin && Some(&s.id) != exclude)
            .filter_map(|s| s.outbound.clone().map(|tx| (s.id.clone(), tx)))
            .collect()
    }
}

/// Handles of a started hub.
struct Running {
    dispatcher_stop: watch::Sender<bool>,
    worker_stop: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Owns a set of channels and relays messages between them.
pub struct Hub {
    settings: HubSettings,
    retry: RetrySettings,
    registry: Arc<Registry>,
    sequence: Arc<AtomicU64>,
    started: bool,
    running: Option<Running>,
}

impl Hub {
    pub fn new(settings: HubSettings, retry: RetrySettings) -> Self {
        Self {
            settings,
            retry,
            registry: Arc::new(Registry::default()),
            sequence: Arc::new(AtomicU64::new(0)),
            started: false,
            running: None,
        }
    }

    /// Build a hub from configuration, constructing every channel entry
    /// through `factory`.
    ///
    /// Invalid hub or retry settings are fatal. A bad channel entry is
    /// logged and skipped; the rejected entries are returned alongside the
    /// hub so callers can report them.
    pub async fn from_config(
        config: &ChatsyncConfig,
        factory: &ChannelFactory,
    ) -> HubResult<(Self, Vec<ConfigError>)> {
        config.validate()?;
        let mut hub = Self::new(config.hub.clone(), config.retry.clone());
        let mut rejected = Vec::new();

        for entry in &config.channels {
            if let Err(e) = hub.add_entry(entry, factory).await {
                warn!(
                    hub = %hub.settings.name,
                    channel = %entry.name,
                    channel_type = %entry.type_id,
                    error = %e,
                    "channel entry rejected"
                );
                rejected.push(e);
            }
        }

        info!(
            hub = %hub.settings.name,
            channels = config.channels.len() - rejected.len(),
            rejected = rejected.len(),
            "hub assembled"
        );
        Ok((hub, rejected))
    }

    async fn add_entry(
        &mut self,
        entry: &ChannelConfig,
        factory: &ChannelFactory,
    ) -> Result<(), ConfigError> {
        if self.contains(&entry.name).await {
            return Err(ConfigError::DuplicateChannel(entry.name.clone()));
        }
        let channel = factory.create(entry)?;
        self.register(channel).await.map(|_| ())
    }

    /// Register an inactive channel. Only allowed before [`start`](Hub::start).
    pub async fn add_channel(&mut self, channel: Arc<dyn Channel>) -> HubResult<ChannelId> {
        if self.started {
            return Err(HubError::AlreadyStarted);
        }
        Ok(self.register(channel).await?)
    }

    async fn register(&mut self, channel: Arc<dyn Channel>) -> Result<ChannelId, ConfigError> {
        let name = channel.name();
        if name.trim().is_empty() || name.trim() != name || name == ChannelId::HUB {
            return Err(ConfigError::InvalidName(name.to_string()));
        }
        if self.contains(name).await {
            return Err(ConfigError::DuplicateChannel(name.to_string()));
        }

        let id = channel.id();
        debug!(
            hub = %self.settings.name,
            channel = %id,
            channel_type = channel.channel_type(),
            direction = %channel.direction(),
            "channel registered"
        );
        self.registry.slots.write().await.push(Slot {
            id: id.clone(),
            channel,
            state: ChannelState::Inactive,
            failures: 0,
            outbound: None,
        });
        Ok(id)
    }

    async fn contains(&self, name: &str) -> bool {
        self.registry
            .slots
            .read()
            .await
            .iter()
            .any(|s| s.id.as_str() == name)
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    /// Spawn the dispatcher and one worker per channel. Activation happens
    /// on the workers; this returns without waiting for it.
    pub async fn start(&mut self) -> HubResult<()> {
        if self.started {
            return Err(HubError::AlreadyStarted);
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(self.settings.inbound_capacity);
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_CAPACITY);
        let (dispatcher_stop, dispatcher_stop_rx) = watch::channel(false);
        let (worker_stop, worker_stop_rx) = watch::channel(false);
        let notices = self.settings.announce_lifecycle.then_some(notice_tx);

        let mut workers = Vec::new();
        {
            let mut slots = self.registry.slots.write().await;
            if slots.is_empty() {
                return Err(HubError::NoChannels(self.settings.name.clone()));
            }
            for slot in slots.iter_mut() {
                let (outbound_tx, outbound_rx) = mpsc::channel(self.settings.queue_capacity);
                slot.outbound = Some(outbound_tx);
                let worker = Worker {
                    id: slot.id.clone(),
                    channel: Arc::clone(&slot.channel),
                    registry: Arc::clone(&self.registry),
                    inbound_tx: inbound_tx.clone(),
                    notices: notices.clone(),
                    retry: self.retry.clone(),
                    flush_timeout: self.shutdown_timeout(),
                };
                workers.push(tokio::spawn(worker.run(outbound_rx, worker_stop_rx.clone())));
            }
        }
        drop(inbound_tx);

        let dispatcher = Dispatcher {
            hub: self.settings.name.clone(),
            registry: Arc::clone(&self.registry),
            sequence: Arc::clone(&self.sequence),
        };
        let dispatcher = tokio::spawn(dispatcher.run(inbound_rx, notice_rx, dispatcher_stop_rx));

        info!(
            hub = %self.settings.name,
            channels = workers.len(),
            "hub started"
        );
        self.started = true;
        self.running = Some(Running {
            dispatcher_stop,
            worker_stop,
            dispatcher,
            workers,
        });
        Ok(())
    }

    fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.shutdown_timeout_ms)
    }

    /// Stop relaying, let workers flush their queues within the shutdown
    /// timeout, then deactivate every channel regardless of its state.
    pub async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!(hub = %self.settings.name, "hub shutting down");

        // Relay what is already inbound before the workers stop.
        let _ = running.dispatcher_stop.send(true);
        if let Err(e) = running.dispatcher.await {
            warn!(hub = %self.settings.name, "dispatcher task failed: {e}");
        }

        let _ = running.worker_stop.send(true);
        let grace = self.shutdown_timeout() + JOIN_GRACE;
        let joins = running.workers.into_iter().map(|mut handle| async move {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
                warn!("channel worker did not stop in time, aborted");
            }
        });
        futures::future::join_all(joins).await;

        let channels: Vec<(ChannelId, Arc<dyn Channel>)> = {
            let mut slots = self.registry.slots.write().await;
            slots
                .iter_mut()
                .map(|slot| {
                    slot.outbound = None;
                    (slot.id.clone(), Arc::clone(&slot.channel))
                })
                .collect()
        };
        for (id, channel) in channels {
            channel.deactivate().await;
            let mut slots = self.registry.slots.write().await;
            if let Some(slot) = slots.iter_mut().find(|s| s.id == id) {
                if !slot.state.is_terminal() {
                    slot.state = ChannelState::Inactive;
                }
            }
        }

        info!(
            hub = %self.settings.name,
            relayed = self.sequence(),
            "hub stopped"
        );
    }

    /// Snapshot of every channel in registration order.
    pub async fn status(&self) -> Vec<ChannelStatus> {
        self.registry
            .slots
            .read()
            .await
            .iter()
            .map(|s| ChannelStatus {
                name: s.id.to_string(),
                channel_type: s.channel.channel_type().to_string(),
                direction: s.channel.direction(),
                state: s.state,
                failures: s.failures,
            })
            .collect()
    }

    pub async fn channel_state(&self, name: &str) -> Option<ChannelState> {
        self.registry
            .slots
            .read()
            .await
            .iter()
            .find(|s| s.id.as_str() == name)
            .map(|s| s.state)
    }

    /// Poll until `name` reaches `state`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, name: &str, state: ChannelState, timeout: Duration) -> bool {
        let poll = async {
            loop {
                if self.channel_state(name).await == Some(state) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Sequence number of the last relayed message.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            let _ = running.dispatcher_stop.send(true);
            let _ = running.worker_stop.send(true);
        }
    }
}

/// Serializes the fan-out decision for all channels.
struct Dispatcher {
    hub: String,
    registry: Arc<Registry>,
    sequence: Arc<AtomicU64>,
}

impl Dispatcher {
    async fn run(
        self,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        mut notice_rx: mpsc::Receiver<Notice>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                Some(inbound) = inbound_rx.recv() => self.relay_inbound(inbound).await,
                Some(notice) = notice_rx.recv() => self.relay_notice(notice).await,
                else => break,
            }
        }

        while let Ok(inbound) = inbound_rx.try_recv() {
            self.relay_inbound(inbound).await;
        }
        while let Ok(notice) = notice_rx.try_recv() {
            self.relay_notice(notice).await;
        }
        debug!(hub = %self.hub, "dispatcher stopped");
    }

    async fn relay_inbound(&self, inbound: InboundMessage) {
        let InboundMessage { origin, message } = inbound;
        match self.registry.direction(&origin).await {
            Some(direction) if direction.can_input() => {}
            Some(_) => {
                debug!(hub = %self.hub, channel = %origin, "ignoring message from output-only channel");
                return;
            }
            None => {
                warn!(hub = %self.hub, channel = %origin, "dropping message from unknown channel");
                return;
            }
        }
        self.fan_out(origin, None, message).await;
    }

    async fn relay_notice(&self, notice: Notice) {
        let message = Message::text(User::system(), notice.text);
        self.fan_out(ChannelId::hub(), Some(&notice.subject), message)
            .await;
    }

    async fn fan_out(&self, origin: ChannelId, exclude: Option<&ChannelId>, message: Message) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let message = Arc::new(message);
        let destinations = self.registry.destinations(&origin, exclude).await;

        let mut queued = 0usize;
        for (destination, queue) in &destinations {
            let dispatch = Dispatch {
                seq,
                origin: origin.clone(),
                message: Arc::clone(&message),
            };
            match queue.try_send(dispatch) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => warn!(
                    hub = %self.hub,
                    seq,
                    source = %origin,
                    destination = %destination,
                    "destination queue full, message dropped"
                ),
                Err(TrySendError::Closed(_)) => warn!(
                    hub = %self.hub,
                    seq,
                    source = %origin,
                    destination = %destination,
                    "destination stopped, message dropped"
                ),
            }
        }

        debug!(
            hub = %self.hub,
            seq,
            source = %origin,
            destinations = queued,
            "message relayed"
        );
    }
}
