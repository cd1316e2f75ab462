//! File channel adapter.
//!
//! Appends relayed messages to a log file, one line per message, and follows
//! an input file (or FIFO), turning every appended line into a text message.

use crate::types::{Channel, Inbound};
use async_trait::async_trait;
use chatsync_types::channel::Direction;
use chatsync_types::config::ChannelConfig;
use chatsync_types::error::{ChannelError, ConfigError};
use chatsync_types::message::Message;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

const DEFAULT_POLL_MS: u64 = 100;

/// File-backed channel.
pub struct FileChannel {
    name: String,
    direction: Direction,
    /// Log file receiving relayed messages.
    output: Option<PathBuf>,
    /// File followed for new lines.
    input: Option<PathBuf>,
    /// How long the follower sleeps at end of file.
    poll_interval: Duration,
    session: Mutex<Option<FileSession>>,
    active: AtomicBool,
}

struct FileSession {
    writer: Option<BufWriter<File>>,
    shutdown_tx: watch::Sender<bool>,
}

impl FileChannel {
    pub const TYPE: &'static str = "file";

    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        output: Option<PathBuf>,
        input: Option<PathBuf>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            output,
            input,
            poll_interval,
            session: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    /// Build from `path`, `input` and `poll_ms` options.
    ///
    /// `path` is required when the channel can output, `input` when it can
    /// input.
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ConfigError> {
        let output = if config.direction.can_output() {
            Some(PathBuf::from(config.require("path")?))
        } else {
            None
        };
        let input = if config.direction.can_input() {
            Some(PathBuf::from(config.require("input")?))
        } else {
            None
        };
        let poll_ms = config.parse_or::<u64>("poll_ms", DEFAULT_POLL_MS)?;
        if poll_ms == 0 {
            return Err(ConfigError::malformed(
                &config.name,
                "poll_ms",
                "must be greater than zero",
            ));
        }
        Ok(Self::new(
            config.name.clone(),
            config.direction,
            output,
            input,
            Duration::from_millis(poll_ms),
        ))
    }

    fn activate_error(&self, path: &Path, e: std::io::Error) -> ChannelError {
        ChannelError::activate(&self.name, format!("cannot open {}", path.display())).with_source(e)
    }

    /// Open the input for following. A regular file is read from its current
    /// end; a FIFO is opened non-blocking so activation does not wait for a
    /// writer.
    async fn open_input(
        &self,
        path: &Path,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>, ChannelError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| self.activate_error(path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if metadata.file_type().is_fifo() {
                let pipe = tokio::net::unix::pipe::OpenOptions::new()
                    .open_receiver(path)
                    .map_err(|e| self.activate_error(path, e))?;
                debug!(channel = %self.name, "following FIFO {}", path.display());
                return Ok(Box::new(pipe));
            }
        }

        let mut file = File::open(path)
            .await
            .map_err(|e| self.activate_error(path, e))?;
        if metadata.is_file() {
            file.seek(SeekFrom::End(0))
                .await
                .map_err(|e| self.activate_error(path, e))?;
        }
        Ok(Box::new(file))
    }
}

#[async_trait]
impl Channel for FileChannel {
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

        let writer = match &self.output {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| self.activate_error(path, e))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if let Some(path) = &self.input {
            let reader = self.open_input(path).await?;
            tokio::spawn(follow(
                reader,
                self.name.clone(),
                inbound,
                self.poll_interval,
                shutdown_rx,
            ));
        }

        *session = Some(FileSession {
            writer,
            shutdown_tx,
        });
        self.active.store(true, Ordering::SeqCst);
        info!(
            channel = %self.name,
            output = ?self.output,
            input = ?self.input,
            "file channel opened"
        );
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let mut session = self.session.lock().await;
        let session = session
            .as_mut()
            .ok_or_else(|| ChannelError::connection(&self.name, "channel is not active"))?;
        let Some(writer) = session.writer.as_mut() else {
            debug!(channel = %self.name, "input-only file channel ignores outbound message");
            return Ok(());
        };

        let line = format!("{message}\n");
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ChannelError::connection(&self.name, "write failed").with_source(e))?;
        writer
            .flush()
            .await
            .map_err(|e| ChannelError::connection(&self.name, "flush failed").with_source(e))?;
        Ok(())
    }

    async fn deactivate(&self) {
        let Some(mut session) = self.session.lock().await.take() else {
            return;
        };
        self.active.store(false, Ordering::SeqCst);
        let _ = session.shutdown_tx.send(true);
        if let Some(writer) = session.writer.as_mut() {
            if let Err(e) = writer.flush().await {
                warn!(channel = %self.name, "flush on close failed: {e}");
            }
        }
        info!(channel = %self.name, "file channel closed");
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Tail `input`, delivering each complete non-empty line. Bytes that are not
/// valid UTF-8 are replaced rather than failing the channel.
async fn follow<R>(
    input: R,
    name: String,
    inbound: Inbound,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin + Send,
{
    let sender = format!("file:{name}");
    let mut reader = BufReader::new(input);
    let mut pending = Vec::new();

    loop {
        let read = tokio::select! {
            _ = shutdown_rx.changed() => break,
            read = reader.read_until(b'\n', &mut pending) => read,
        };

        match read {
            Ok(0) => {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Ok(_) => {
                // A line without its terminator is still being written.
                if !pending.ends_with(b"\n") {
                    continue;
                }
                let line = String::from_utf8_lossy(&pending)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                pending.clear();
                if line.trim().is_empty() {
                    continue;
                }
                let message = Message::text(inbound.user(sender.as_str()), line);
                if !inbound.deliver(message).await {
                    break;
                }
            }
            Err(e) => {
                inbound.fail(ChannelError::connection(&name, "read failed").with_source(e));
                break;
            }
        }
    }

    debug!(channel = %name, "file follower stopped");
}
