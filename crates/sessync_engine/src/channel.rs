//! Push channel manager.
//!
//! Owns at most one live connection at a time. The connection is read by a
//! spawned task that decodes frames, enforces heartbeat liveness and reports
//! everything back as [`ChannelMessage`]s tagged with a generation number.

use crate::state::EngineStats;
use crate::transport::{PushConnection, PushTransport};
use parking_lot::RwLock;
use sessync_protocol::{decode_frame, LogicalTimestamp, PushFrame};
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote side closed the stream.
    Remote,
    /// Reading failed.
    Transport(String),
    /// No frame arrived within the heartbeat timeout.
    HeartbeatTimeout,
    /// Closed by the engine.
    Local,
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The connection is established.
    Opened,
    /// A data frame arrived.
    Frame(PushFrame),
    /// A heartbeat arrived.
    Heartbeat(LogicalTimestamp),
    /// The connection ended.
    Closed(CloseReason),
    /// The connection could not be established.
    ConnectFailed(String),
}

/// A channel event together with the connection that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Connection generation; bumped on every `open`.
    pub generation: u64,
    /// The event.
    pub event: ChannelEvent,
}

/// Manages the push connection.
pub struct PushChannel<P> {
    transport: Arc<P>,
    connect_timeout: Duration,
    heartbeat_timeout: Option<Duration>,
    stats: Arc<RwLock<EngineStats>>,
    generation: u64,
    shutdown: Option<oneshot::Sender<()>>,
}

impl<P: PushTransport> PushChannel<P> {
    /// Creates a closed channel.
    pub fn new(
        transport: Arc<P>,
        connect_timeout: Duration,
        heartbeat_timeout: Option<Duration>,
        stats: Arc<RwLock<EngineStats>>,
    ) -> Self {
        Self {
            transport,
            connect_timeout,
            heartbeat_timeout,
            stats,
            generation: 0,
            shutdown: None,
        }
    }

    /// Generation of the most recent connection.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true if a reader task is running.
    pub fn is_open(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Opens a new connection, closing any previous one first.
    ///
    /// Events are sent to `events`; the returned generation identifies them.
    pub fn open(&mut self, events: mpsc::UnboundedSender<ChannelMessage>) -> u64 {
        self.close();
        self.generation += 1;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown = Some(shutdown_tx);

        let reader = Reader {
            generation: self.generation,
            connect_timeout: self.connect_timeout,
            heartbeat_timeout: self.heartbeat_timeout,
            stats: Arc::clone(&self.stats),
            events,
        };
        tokio::spawn(reader.run(Arc::clone(&self.transport), shutdown_rx));
        self.generation
    }

    /// Closes the current connection. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl<P> Drop for PushChannel<P> {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

struct Reader {
    generation: u64,
    connect_timeout: Duration,
    heartbeat_timeout: Option<Duration>,
    stats: Arc<RwLock<EngineStats>>,
    events: mpsc::UnboundedSender<ChannelMessage>,
}

impl Reader {
    async fn run<P: PushTransport>(self, transport: Arc<P>, mut shutdown: oneshot::Receiver<()>) {
        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = tokio::time::timeout(self.connect_timeout, transport.connect()) => result,
        };
        let mut conn = match connected {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(generation = self.generation, error = %e, "push connect failed");
                self.emit(ChannelEvent::ConnectFailed(e.to_string()));
                return;
            }
            Err(_) => {
                warn!(generation = self.generation, timeout = ?self.connect_timeout, "push connect timed out");
                self.emit(ChannelEvent::ConnectFailed(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                )));
                return;
            }
        };

        info!(generation = self.generation, "push channel opened");
        self.emit(ChannelEvent::Opened);

        let reason = self.read_loop(conn.as_mut(), &mut shutdown).await;
        conn.close().await;

        info!(generation = self.generation, reason = ?reason, "push channel closed");
        if reason != CloseReason::Local {
            self.emit(ChannelEvent::Closed(reason));
        }
    }

    async fn read_loop(
        &self,
        conn: &mut dyn PushConnection,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> CloseReason {
        loop {
            // recreated every iteration, so any frame resets the deadline
            let liveness = async {
                match self.heartbeat_timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => future::pending::<()>().await,
                }
            };

            let item = tokio::select! {
                _ = &mut *shutdown => return CloseReason::Local,
                _ = liveness => {
                    warn!(generation = self.generation, "no frame within heartbeat timeout");
                    return CloseReason::HeartbeatTimeout;
                }
                item = conn.recv() => item,
            };

            let raw = match item {
                None => return CloseReason::Remote,
                Some(Err(e)) => return CloseReason::Transport(e.to_string()),
                Some(Ok(raw)) => raw,
            };

            match decode_frame(&raw) {
                Ok(frame) => {
                    self.stats.write().frames_received += 1;
                    let event = match frame {
                        PushFrame::Heartbeat { timestamp } => ChannelEvent::Heartbeat(timestamp),
                        frame => {
                            debug!(generation = self.generation, kind = frame.kind(), timestamp = frame.timestamp(), "push frame");
                            ChannelEvent::Frame(frame)
                        }
                    };
                    self.emit(event);
                }
                Err(e) => {
                    self.stats.write().frames_dropped += 1;
                    warn!(generation = self.generation, bytes = raw.len(), error = %e, "dropping malformed frame");
                }
            }
        }
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(ChannelMessage {
            generation: self.generation,
            event,
        });
    }
}
