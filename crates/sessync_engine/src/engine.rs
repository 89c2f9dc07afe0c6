//! Engine facade.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::driver::{Driver, DriverCommand, Shared};
use crate::error::{SyncError, SyncResult};
use crate::http::HttpSnapshotClient;
use crate::reconciler::{Listener, Reconciler, Subscribers};
use crate::snapshot::SnapshotFetcher;
use crate::state::{ConnectionStatus, EngineStats, SyncedState};
use crate::transport::{PushTransport, SnapshotTransport};
use crate::ws::WebSocketTransport;
use parking_lot::{Mutex, RwLock};
use sessync_protocol::SessionCommand;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct DriverHandle {
    commands: mpsc::UnboundedSender<DriverCommand>,
    task: JoinHandle<()>,
}

impl DriverHandle {
    fn is_running(&self) -> bool {
        !self.task.is_finished() && !self.commands.is_closed()
    }
}

/// Handle returned by [`SyncEngine::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    subscribers: Subscribers,
    id: Option<u64>,
}

impl Subscription {
    /// Removes the listener. Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.id {
            Some(id) => self.subscribers.remove(id),
            None => false,
        }
    }

    /// Returns true if the listener was registered.
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }
}

/// Keeps a [`SyncedState`] consistent with a remote session.
///
/// The engine merges push frames from `P` with snapshots polled from `S`
/// and publishes the result to subscribers.
///
/// # Example
///
/// ```ignore
/// let engine = SyncEngine::remote(
///     EngineConfig::default(),
///     "http://127.0.0.1:8080/api",
///     "ws://127.0.0.1:8080/events",
/// )?;
/// let _sub = engine.subscribe(|state| println!("{:?}", state.connection.quality));
/// engine.initialize().await?;
/// ```
pub struct SyncEngine<P: PushTransport, S: SnapshotTransport> {
    config: EngineConfig,
    push: Arc<P>,
    fetcher: SnapshotFetcher<S>,
    shared: Shared,
    state: watch::Receiver<SyncedState>,
    subscribers: Subscribers,
    driver: Mutex<Option<DriverHandle>>,
    destroyed: AtomicBool,
}

impl SyncEngine<WebSocketTransport, HttpSnapshotClient> {
    /// Creates an engine talking HTTP to `base_url` and WebSocket to
    /// `events_url`.
    pub fn remote(
        config: EngineConfig,
        base_url: impl Into<String>,
        events_url: impl Into<String>,
    ) -> SyncResult<Self> {
        Self::new(
            config,
            WebSocketTransport::new(events_url),
            HttpSnapshotClient::new(base_url),
        )
    }
}

impl<P: PushTransport, S: SnapshotTransport> SyncEngine<P, S> {
    /// Creates an engine. Nothing runs until [`SyncEngine::initialize`].
    pub fn new(config: EngineConfig, push: P, snapshots: S) -> SyncResult<Self> {
        config.validate()?;

        let subscribers = Subscribers::new();
        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let reconciler = Reconciler::new(subscribers.clone(), Arc::clone(&stats));
        let state = reconciler.watch();

        Ok(Self {
            fetcher: SnapshotFetcher::new(Arc::new(snapshots), config.request_timeout),
            config,
            push: Arc::new(push),
            shared: Shared {
                reconciler: Arc::new(Mutex::new(reconciler)),
                stats,
                clock: Clock::new(),
            },
            state,
            subscribers,
            driver: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens the push channel, seeds state from one snapshot and starts
    /// polling.
    ///
    /// Fails with [`SyncError::InitializationFailed`] once the retry budget
    /// is spent; background work is stopped in that case. Calling this on a
    /// running engine re-seeds it and reopens a push channel that gave up.
    pub async fn initialize(&self) -> SyncResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        info!("initializing sync engine");
        self.shared.reconciler.lock().begin_initialize();
        self.start_driver();

        let result = self.fetcher.fetch_with_retry(&self.config.poll).await;
        if self.is_destroyed() {
            return Err(SyncError::Cancelled);
        }

        match result {
            Ok(snapshot) => {
                let now = self.shared.clock.now_ms();
                let mut reconciler = self.shared.reconciler.lock();
                reconciler.apply_snapshot(&snapshot, now);
                reconciler.finish_initialize(None);
                info!(timestamp = snapshot.timestamp, "sync engine initialized");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "sync engine initialization failed");
                self.stop_driver();
                let now = self.shared.clock.now_ms();
                let mut reconciler = self.shared.reconciler.lock();
                reconciler.set_connection_status(ConnectionStatus::Disconnected);
                reconciler.refresh_quality(now);
                reconciler.finish_initialize(Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Registers a listener, calls it with the current state, and again on
    /// every published change.
    ///
    /// After [`SyncEngine::destroy`] this returns an inactive subscription.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncedState) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let id = self.subscribers.subscribe(listener, &self.state);
        Subscription {
            subscribers: self.subscribers.clone(),
            id,
        }
    }

    /// Returns the last published state without blocking.
    pub fn get_state(&self) -> SyncedState {
        self.state.borrow().clone()
    }

    /// Returns a receiver that observes every published state.
    pub fn watch(&self) -> watch::Receiver<SyncedState> {
        self.state.clone()
    }

    /// Returns engine statistics.
    pub fn stats(&self) -> EngineStats {
        self.shared.stats.read().clone()
    }

    /// Asks the provider to pause the session.
    pub async fn pause(&self) -> SyncResult<()> {
        self.command(SessionCommand::Pause).await
    }

    /// Asks the provider to resume the session.
    pub async fn resume(&self) -> SyncResult<()> {
        self.command(SessionCommand::Resume).await
    }

    /// Asks the provider to complete the session.
    pub async fn complete(&self) -> SyncResult<()> {
        self.command(SessionCommand::Complete).await
    }

    /// Stops the channel, timers and subscribers. Idempotent; every later
    /// call on the engine is a no-op.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("destroying sync engine");
        self.stop_driver();
        self.subscribers.close();
    }

    /// Returns true once [`SyncEngine::destroy`] was called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Sends `command`; the resulting state arrives through push or poll.
    async fn command(&self, command: SessionCommand) -> SyncResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        debug!(%command, "session command");
        self.fetcher.send_command(command).await?;
        self.send_driver(DriverCommand::PollNow);
        Ok(())
    }

    fn start_driver(&self) {
        let mut driver = self.driver.lock();
        if let Some(handle) = driver.as_ref().filter(|h| h.is_running()) {
            let _ = handle.commands.send(DriverCommand::Restart);
            return;
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let task = Driver::new(
            self.config.clone(),
            self.shared.clone(),
            Arc::clone(&self.push),
            self.fetcher.clone(),
            rx,
        );
        *driver = Some(DriverHandle {
            commands,
            task: tokio::spawn(task.run()),
        });
    }

    fn stop_driver(&self) {
        if let Some(handle) = self.driver.lock().take() {
            let _ = handle.commands.send(DriverCommand::Shutdown);
        }
    }

    fn send_driver(&self, command: DriverCommand) {
        if let Some(handle) = self.driver.lock().as_ref() {
            let _ = handle.commands.send(command);
        }
    }
}

impl<P: PushTransport, S: SnapshotTransport> Drop for SyncEngine<P, S> {
    fn drop(&mut self) {
        self.destroy();
    }
}
