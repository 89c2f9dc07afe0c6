//! Transport layer abstraction for the engine.
//!
//! The engine talks to the provider through two traits: a request/response
//! [`SnapshotTransport`] for snapshots and control commands, and a
//! [`PushTransport`] that opens long-lived [`PushConnection`]s. Production
//! implementations live in [`crate::http`] and [`crate::ws`];
//! [`MockTransport`] implements both for tests.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use sessync_protocol::{PushFrame, RawFrame, SessionCommand, SessionSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Fetches snapshots and sends control commands.
#[async_trait]
pub trait SnapshotTransport: Send + Sync + 'static {
    /// Fetches the current session snapshot.
    async fn fetch_snapshot(&self) -> SyncResult<SessionSnapshot>;

    /// Sends a control command.
    async fn send_command(&self, command: SessionCommand) -> SyncResult<()>;
}

/// Opens push connections.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Opens a new connection.
    async fn connect(&self) -> SyncResult<Box<dyn PushConnection>>;
}

/// An open push connection.
#[async_trait]
pub trait PushConnection: Send {
    /// Waits for the next frame. `None` means the remote closed the stream.
    async fn recv(&mut self) -> Option<SyncResult<RawFrame>>;

    /// Closes the connection.
    async fn close(&mut self);
}

#[derive(Default)]
struct MockState {
    snapshot: Option<SessionSnapshot>,
    failing_fetches: u32,
    reject_fetches: bool,
    fetch_delay: Duration,
    fetch_count: u32,
    commands: Vec<SessionCommand>,
    reject_connections: bool,
    failing_connects: u32,
    connect_count: u32,
    connection: Option<mpsc::UnboundedSender<SyncResult<RawFrame>>>,
}

/// A scriptable in-memory transport for testing.
///
/// Cloning shares the underlying state, so a test keeps one handle while
/// the engine owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Creates a new mock transport with no snapshot configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the snapshot returned by every successful fetch.
    pub fn set_snapshot(&self, snapshot: SessionSnapshot) {
        self.inner.lock().snapshot = Some(snapshot);
    }

    /// Makes the next `count` fetches fail with a retryable error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.inner.lock().failing_fetches = count;
    }

    /// Makes every fetch fail while `reject` is set.
    pub fn reject_fetches(&self, reject: bool) {
        self.inner.lock().reject_fetches = reject;
    }

    /// Delays every fetch by `delay`.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.inner.lock().fetch_delay = delay;
    }

    /// Number of fetches attempted.
    pub fn fetch_count(&self) -> u32 {
        self.inner.lock().fetch_count
    }

    /// Commands received, in order.
    pub fn commands(&self) -> Vec<SessionCommand> {
        self.inner.lock().commands.clone()
    }

    /// Makes every connect fail while `reject` is set.
    pub fn reject_connections(&self, reject: bool) {
        self.inner.lock().reject_connections = reject;
    }

    /// Makes the next `count` connects fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.lock().failing_connects = count;
    }

    /// Number of connects attempted.
    pub fn connect_count(&self) -> u32 {
        self.inner.lock().connect_count
    }

    /// Returns true while a connection is open and its reader is alive.
    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .connection
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Delivers a frame as JSON text on the open connection.
    ///
    /// Returns false if no connection is open.
    pub fn push_frame(&self, frame: &PushFrame) -> bool {
        match frame.to_json() {
            Ok(text) => self.push_raw(RawFrame::Text(text)),
            Err(_) => false,
        }
    }

    /// Delivers a raw frame on the open connection.
    pub fn push_raw(&self, frame: RawFrame) -> bool {
        self.send(Ok(frame))
    }

    /// Delivers a transport error on the open connection.
    pub fn fail_connection(&self, message: &str) -> bool {
        self.send(Err(SyncError::transport_retryable(message)))
    }

    /// Closes the open connection from the remote side.
    pub fn drop_connection(&self) -> bool {
        self.inner.lock().connection.take().is_some()
    }

    fn send(&self, item: SyncResult<RawFrame>) -> bool {
        self.inner
            .lock()
            .connection
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok())
    }
}

#[async_trait]
impl SnapshotTransport for MockTransport {
    async fn fetch_snapshot(&self) -> SyncResult<SessionSnapshot> {
        let delay = {
            let mut state = self.inner.lock();
            state.fetch_count += 1;
            state.fetch_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock();
        if state.reject_fetches {
            return Err(SyncError::transport_retryable("mock fetch rejected"));
        }
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(SyncError::transport_retryable("mock fetch failure"));
        }
        state
            .snapshot
            .clone()
            .ok_or_else(|| SyncError::transport_fatal("no mock snapshot set"))
    }

    async fn send_command(&self, command: SessionCommand) -> SyncResult<()> {
        self.inner.lock().commands.push(command);
        Ok(())
    }
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn connect(&self) -> SyncResult<Box<dyn PushConnection>> {
        let mut state = self.inner.lock();
        state.connect_count += 1;
        if state.reject_connections {
            return Err(SyncError::transport_retryable("mock connect rejected"));
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(SyncError::transport_retryable("mock connect failure"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.connection = Some(tx);
        Ok(Box::new(MockConnection { rx }))
    }
}

struct MockConnection {
    rx: mpsc::UnboundedReceiver<SyncResult<RawFrame>>,
}

#[async_trait]
impl PushConnection for MockConnection {
    async fn recv(&mut self) -> Option<SyncResult<RawFrame>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessync_protocol::SessionInfo;

    #[tokio::test]
    async fn mock_snapshot_failures_then_success() {
        let transport = MockTransport::new();
        transport.set_snapshot(SessionSnapshot::with_session(3, SessionInfo::active("s", 0)));
        transport.fail_next_fetches(2);

        assert!(transport.fetch_snapshot().await.is_err());
        assert!(transport.fetch_snapshot().await.is_err());
        assert_eq!(transport.fetch_snapshot().await.unwrap().timestamp, 3);
        assert_eq!(transport.fetch_count(), 3);
    }

    #[tokio::test]
    async fn mock_without_snapshot_errors() {
        let transport = MockTransport::new();
        let err = transport.fetch_snapshot().await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn mock_records_commands() {
        let transport = MockTransport::new();
        transport.send_command(SessionCommand::Pause).await.unwrap();
        transport.send_command(SessionCommand::Resume).await.unwrap();
        assert_eq!(
            transport.commands(),
            vec![SessionCommand::Pause, SessionCommand::Resume]
        );
    }

    #[tokio::test]
    async fn mock_connection_delivers_and_closes() {
        let transport = MockTransport::new();
        assert!(!transport.push_frame(&PushFrame::Heartbeat { timestamp: 1 }));

        let mut conn = transport.connect().await.unwrap();
        assert!(transport.is_connected());
        assert!(transport.push_frame(&PushFrame::Heartbeat { timestamp: 1 }));

        match conn.recv().await {
            Some(Ok(RawFrame::Text(text))) => assert!(text.contains("heartbeat")),
            other => panic!("unexpected frame: {other:?}"),
        }

        assert!(transport.drop_connection());
        assert!(conn.recv().await.is_none());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn mock_connect_failures() {
        let transport = MockTransport::new();
        transport.fail_next_connects(1);
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());

        transport.reject_connections(true);
        assert!(transport.connect().await.is_err());
        assert_eq!(transport.connect_count(), 3);
    }
}
