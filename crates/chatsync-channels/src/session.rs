//! Outbound line queue shared by the socket-backed adapters.
//!
//! `send` hands each wire line to the connection task and waits until the
//! task has written it, so a successful `send` means the bytes reached the
//! socket. Lines still queued when a session ends are either written (on a
//! clean shutdown) or rejected with a warning (when the connection broke).

use chatsync_types::error::ChannelError;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Queue depth between `send` and the connection task.
pub(crate) const WRITE_QUEUE: usize = 64;

/// One wire line and the acknowledgement its sender waits on.
pub(crate) struct Outgoing {
    pub line: String,
    written: oneshot::Sender<Result<(), String>>,
}

impl Outgoing {
    pub(crate) fn ack(self, result: Result<(), String>) {
        let _ = self.written.send(result);
    }
}

/// Queue `line` on the session and wait until it has been written.
pub(crate) async fn write_line(
    write_tx: &mpsc::Sender<Outgoing>,
    channel: &str,
    line: String,
) -> Result<(), ChannelError> {
    let (written, ack) = oneshot::channel();
    write_tx
        .send(Outgoing { line, written })
        .await
        .map_err(|_| ChannelError::connection(channel, "session closed"))?;
    match ack.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => Err(ChannelError::connection(channel, reason)),
        Err(_) => Err(ChannelError::connection(
            channel,
            "session closed before the message was written",
        )),
    }
}

/// Write one queued line and acknowledge it.
pub(crate) async fn write_one<W>(writer: &mut W, out: Outgoing) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match writer.write_all(out.line.as_bytes()).await {
        Ok(()) => {
            out.ack(Ok(()));
            Ok(())
        }
        Err(e) => {
            out.ack(Err(format!("write failed: {e}")));
            Err(e)
        }
    }
}

/// Stop accepting lines and write everything already queued.
pub(crate) async fn flush_pending<W>(
    write_rx: &mut mpsc::Receiver<Outgoing>,
    writer: &mut W,
    channel: &str,
) where
    W: AsyncWrite + Unpin,
{
    write_rx.close();
    while let Ok(out) = write_rx.try_recv() {
        if let Err(e) = write_one(writer, out).await {
            warn!(channel, "write failed while closing: {e}");
            reject_pending(write_rx, channel, "write failed while closing");
            return;
        }
    }
}

/// Stop accepting lines and fail everything already queued.
pub(crate) fn reject_pending(write_rx: &mut mpsc::Receiver<Outgoing>, channel: &str, reason: &str) {
    write_rx.close();
    while let Ok(out) = write_rx.try_recv() {
        warn!(channel, reason, line = %out.line.trim_end(), "outbound line dropped");
        out.ack(Err(reason.to_string()));
    }
}
