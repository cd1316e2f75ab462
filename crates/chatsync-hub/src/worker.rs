//! Per-channel lifecycle task.

use crate::hub::{Dispatch, Registry};
use crate::retry::RetryBudget;
use chatsync_channels::{Channel, Inbound, InboundMessage};
use chatsync_types::channel::{ChannelId, ChannelState};
use chatsync_types::config::RetrySettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the per-activation failure report queue.
const FAILURE_CAPACITY: usize = 4;

/// Lifecycle event broadcast to the other channels.
#[derive(Debug, Clone)]
pub(crate) struct Notice {
    /// The channel the notice is about; it never receives it.
    pub subject: ChannelId,
    pub text: String,
}

/// Drives one channel: activation, relayed sends, failure and retry.
pub(crate) struct Worker {
    pub id: ChannelId,
    pub channel: Arc<dyn Channel>,
    pub registry: Arc<Registry>,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    /// `None` when lifecycle notices are disabled.
    pub notices: Option<mpsc::Sender<Notice>>,
    pub retry: RetrySettings,
    /// How long queued messages may take to flush at shutdown.
    pub flush_timeout: Duration,
}

impl Worker {
    pub(crate) async fn run(
        self,
        mut outbound_rx: mpsc::Receiver<Dispatch>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut budget = RetryBudget::new(self.retry.clone());

        'lifecycle: loop {
            self.registry
                .set_state(&self.id, ChannelState::Activating)
                .await;
            let (fail_tx, mut fail_rx) = mpsc::channel(FAILURE_CAPACITY);
            let inbound = Inbound::new(self.id.clone(), self.inbound_tx.clone(), fail_tx);

            let activated = tokio::select! {
                biased;
                _ = stop_rx.changed() => break 'lifecycle,
                result = self.channel.activate(inbound) => result,
            };

            if let Err(e) = activated {
                warn!(
                    channel = %self.id,
                    kind = %e.kind(),
                    cause = %e.cause_chain(),
                    attempt = budget.failed() + 1,
                    "channel activation failed"
                );
                self.channel.deactivate().await;
                self.registry.record_failure(&self.id).await;
                match budget.next_delay() {
                    Some(delay) => {
                        if self
                            .wait_to_retry(delay, budget.failed(), &mut outbound_rx, &mut stop_rx)
                            .await
                        {
                            continue;
                        }
                        break 'lifecycle;
                    }
                    None => {
                        self.remove(budget.failed(), &mut outbound_rx).await;
                        return;
                    }
                }
            }

            budget.reset();
            self.registry.set_state(&self.id, ChannelState::Active).await;
            info!(
                channel = %self.id,
                channel_type = self.channel.channel_type(),
                "channel activated"
            );
            self.announce(format!("channel {} connected", self.id));

            let failure = loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        self.flush(&mut outbound_rx).await;
                        break 'lifecycle;
                    }
                    Some(failure) = fail_rx.recv() => break failure,
                    Some(dispatch) = outbound_rx.recv() => {
                        if let Err(e) = self.channel.send(&dispatch.message).await {
                            warn!(
                                channel = %self.id,
                                seq = dispatch.seq,
                                source = %dispatch.origin,
                                "relay failed, message dropped"
                            );
                            break e;
                        }
                        trace!(channel = %self.id, seq = dispatch.seq, "message delivered");
                    }
                }
            };

            self.registry.set_state(&self.id, ChannelState::Failed).await;
            self.registry.record_failure(&self.id).await;
            warn!(
                channel = %self.id,
                kind = %failure.kind(),
                cause = %failure.cause_chain(),
                "channel failed"
            );
            self.channel.deactivate().await;
            self.drain(&mut outbound_rx, "channel failed");
            self.announce(format!(
                "channel {} disconnected: {}",
                self.id,
                failure.reason()
            ));

            if !self
                .wait_to_retry(budget.reconnect_delay(), 1, &mut outbound_rx, &mut stop_rx)
                .await
            {
                break 'lifecycle;
            }
        }

        debug!(channel = %self.id, "channel worker stopped");
    }

    /// Sleep in `Retrying` until the next attempt, dropping anything relayed
    /// meanwhile. Returns `false` when the hub is stopping.
    async fn wait_to_retry(
        &self,
        delay: Duration,
        attempt: u32,
        outbound_rx: &mut mpsc::Receiver<Dispatch>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        self.registry
            .set_state(&self.id, ChannelState::Retrying)
            .await;
        info!(
            channel = %self.id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "channel retry scheduled"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => return false,
                _ = &mut sleep => return true,
                Some(dispatch) = outbound_rx.recv() => self.dropped(&dispatch, "channel retrying"),
            }
        }
    }

    /// Give up on the channel after its retry budget is spent.
    async fn remove(&self, attempts: u32, outbound_rx: &mut mpsc::Receiver<Dispatch>) {
        self.registry
            .set_state(&self.id, ChannelState::Removed)
            .await;
        error!(
            channel = %self.id,
            attempts,
            "channel retry exhausted, channel removed"
        );
        self.drain(outbound_rx, "channel removed");
        outbound_rx.close();
        self.announce(format!("channel {} removed", self.id));
    }

    /// Deliver what is still queued, within the flush timeout.
    async fn flush(&self, outbound_rx: &mut mpsc::Receiver<Dispatch>) {
        let deadline = Instant::now() + self.flush_timeout;
        while let Ok(dispatch) = outbound_rx.try_recv() {
            match tokio::time::timeout_at(deadline, self.channel.send(&dispatch.message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.dropped(&dispatch, &format!("send failed during shutdown: {e}"));
                    self.drain(outbound_rx, "shutdown");
                    return;
                }
                Err(_) => {
                    self.dropped(&dispatch, "shutdown timeout");
                    self.drain(outbound_rx, "shutdown timeout");
                    return;
                }
            }
        }
    }

    fn drain(&self, outbound_rx: &mut mpsc::Receiver<Dispatch>, reason: &str) {
        while let Ok(dispatch) = outbound_rx.try_recv() {
            self.dropped(&dispatch, reason);
        }
    }

    fn dropped(&self, dispatch: &Dispatch, reason: &str) {
        warn!(
            channel = %self.id,
            seq = dispatch.seq,
            source = %dispatch.origin,
            reason,
            "message dropped"
        );
    }

    fn announce(&self, text: String) {
        let Some(notices) = &self.notices else {
            return;
        };
        let notice = Notice {
            subject: self.id.clone(),
            text,
        };
        if let Err(e) = notices.try_send(notice) {
            warn!(channel = %self.id, "lifecycle notice dropped: {e}");
        }
    }
}

