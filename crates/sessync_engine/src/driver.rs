//! The engine's background task.
//!
//! One task per running engine owns the push channel, the reconnection
//! controller and the poll scheduler, and multiplexes every input with
//! `tokio::select!`. State changes go through the shared [`Reconciler`],
//! whose lock is only taken in short synchronous sections.

use crate::channel::{ChannelEvent, ChannelMessage, CloseReason, PushChannel};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::SyncResult;
use crate::poll::PollScheduler;
use crate::reconciler::Reconciler;
use crate::reconnect::{ReconnectController, ReconnectDecision, ReconnectPhase};
use crate::snapshot::SnapshotFetcher;
use crate::state::{ConnectionStatus, EngineStats};
use crate::transport::{PushTransport, SnapshotTransport};
use parking_lot::{Mutex, RwLock};
use sessync_protocol::SessionSnapshot;
use std::future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Requests from the facade to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DriverCommand {
    /// Fetch a snapshot now.
    PollNow,
    /// Reopen the push channel if it gave up, and reset polling.
    Restart,
    /// Stop everything.
    Shutdown,
}

/// State shared between the facade and the driver.
#[derive(Clone)]
pub(crate) struct Shared {
    pub(crate) reconciler: Arc<Mutex<Reconciler>>,
    pub(crate) stats: Arc<RwLock<EngineStats>>,
    pub(crate) clock: Clock,
}

pub(crate) struct Driver<P, S> {
    config: EngineConfig,
    shared: Shared,
    channel: PushChannel<P>,
    fetcher: SnapshotFetcher<S>,
    reconnect: ReconnectController,
    poll: PollScheduler,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    events_tx: mpsc::UnboundedSender<ChannelMessage>,
    events_rx: mpsc::UnboundedReceiver<ChannelMessage>,
    fetch_tx: mpsc::UnboundedSender<SyncResult<SessionSnapshot>>,
    fetch_rx: mpsc::UnboundedReceiver<SyncResult<SessionSnapshot>>,
    fetch_in_flight: bool,
    poll_deadline: Instant,
    reconnect_deadline: Option<Instant>,
}

impl<P: PushTransport, S: SnapshotTransport> Driver<P, S> {
    pub(crate) fn new(
        config: EngineConfig,
        shared: Shared,
        push: Arc<P>,
        fetcher: SnapshotFetcher<S>,
        commands: mpsc::UnboundedReceiver<DriverCommand>,
    ) -> Self {
        let channel = PushChannel::new(
            push,
            config.connect_timeout,
            config.heartbeat_timeout,
            Arc::clone(&shared.stats),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            reconnect: ReconnectController::new(config.poll.clone()),
            poll: PollScheduler::new(config.poll.clone()),
            poll_deadline: Instant::now() + config.poll.interval,
            config,
            shared,
            channel,
            fetcher,
            commands,
            events_tx,
            events_rx,
            fetch_tx,
            fetch_rx,
            fetch_in_flight: false,
            reconnect_deadline: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.start_channel();

        let mut quality_tick = tokio::time::interval(self.config.quality_check_interval);
        quality_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(DriverCommand::PollNow) => self.poll_now(),
                    Some(DriverCommand::Restart) => self.restart(),
                    Some(DriverCommand::Shutdown) | None => break,
                },
                Some(message) = self.events_rx.recv() => self.on_channel(message),
                Some(result) = self.fetch_rx.recv() => self.on_fetch(result),
                _ = tokio::time::sleep_until(self.poll_deadline) => self.on_poll_tick(),
                _ = wait_until(self.reconnect_deadline) => self.on_reconnect_due(),
                _ = quality_tick.tick() => self.on_quality_tick(),
            }
        }

        self.channel.close();
        self.reconnect.stop();
        {
            let now = self.now_ms();
            let mut reconciler = self.shared.reconciler.lock();
            reconciler.set_connection_status(ConnectionStatus::Disconnected);
            reconciler.refresh_quality(now);
        }
        debug!("driver stopped");
    }

    fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    fn start_channel(&mut self) {
        self.reconnect.start();
        self.reconnect_deadline = None;
        {
            let mut reconciler = self.shared.reconciler.lock();
            reconciler.set_reconnect_attempts(0);
            reconciler.set_connection_status(ConnectionStatus::Connecting);
        }
        let generation = self.channel.open(self.events_tx.clone());
        debug!(generation, "opening push channel");
    }

    fn restart(&mut self) {
        if matches!(
            self.reconnect.phase(),
            ReconnectPhase::GaveUp | ReconnectPhase::Idle
        ) {
            info!("restarting push channel");
            self.start_channel();
        }
        self.poll.reset();
        self.poll_deadline = Instant::now() + self.poll.current_interval();
    }

    fn on_channel(&mut self, message: ChannelMessage) {
        if message.generation != self.channel.generation() {
            trace!(generation = message.generation, "ignoring event from superseded connection");
            return;
        }
        let now = self.now_ms();
        match message.event {
            ChannelEvent::Opened => {
                self.reconnect.on_connected();
                let mut reconciler = self.shared.reconciler.lock();
                reconciler.set_connection_status(ConnectionStatus::Connected);
                reconciler.set_reconnect_attempts(0);
            }
            ChannelEvent::Frame(frame) => {
                let outcome = self.shared.reconciler.lock().apply_push_event(&frame, now);
                if outcome.changed() {
                    self.poll.record_change(now);
                }
            }
            ChannelEvent::Heartbeat(timestamp) => {
                trace!(timestamp, "heartbeat");
                self.shared.reconciler.lock().refresh_quality(now);
            }
            ChannelEvent::Closed(reason) => {
                let message = match reason {
                    CloseReason::Remote => "closed by remote".to_string(),
                    CloseReason::Transport(e) => e,
                    CloseReason::HeartbeatTimeout => "heartbeat timeout".to_string(),
                    CloseReason::Local => return,
                };
                self.on_channel_failure(&message);
            }
            ChannelEvent::ConnectFailed(e) => self.on_channel_failure(&e),
        }
    }

    fn on_channel_failure(&mut self, error: &str) {
        self.shared
            .reconciler
            .lock()
            .set_connection_status(ConnectionStatus::Disconnected);

        // fall back to the base poll interval right away
        self.poll.channel_unhealthy();
        let next_poll = Instant::now() + self.poll.current_interval();
        if next_poll < self.poll_deadline {
            self.poll_deadline = next_poll;
        }

        match self.reconnect.on_failure() {
            Some(ReconnectDecision::Retry { attempt, delay }) => {
                info!(attempt, ?delay, error, "scheduling push reconnect");
                self.shared.stats.write().reconnect_attempts += 1;
                self.shared.reconciler.lock().set_reconnect_attempts(attempt);
                self.reconnect_deadline = Some(Instant::now() + delay);
            }
            Some(ReconnectDecision::GiveUp { attempts }) => {
                warn!(attempts, error, "giving up on push channel; polling only");
                self.reconnect_deadline = None;
                self.shared.reconciler.lock().mark_gave_up(format!(
                    "push channel unavailable after {attempts} reconnect attempts: {error}"
                ));
            }
            None => {}
        }
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect_deadline = None;
        self.reconnect.begin_attempt();
        self.shared
            .reconciler
            .lock()
            .set_connection_status(ConnectionStatus::Connecting);
        let generation = self.channel.open(self.events_tx.clone());
        debug!(generation, attempt = self.reconnect.attempts(), "reconnecting push channel");
    }

    fn on_poll_tick(&mut self) {
        let now = self.now_ms();
        let connection = self.shared.reconciler.lock().state().connection.clone();
        if self.poll.should_skip(&connection, now) {
            self.shared.stats.write().polls_skipped += 1;
            trace!("push data is fresh; skipping poll");
        } else {
            self.spawn_fetch();
        }
        self.poll_deadline = Instant::now() + self.poll.current_interval();
    }

    fn poll_now(&mut self) {
        self.spawn_fetch();
        self.poll_deadline = Instant::now() + self.poll.current_interval();
    }

    fn spawn_fetch(&mut self) {
        if self.fetch_in_flight {
            trace!("snapshot fetch already in flight");
            return;
        }
        self.fetch_in_flight = true;
        self.shared.stats.write().polls_issued += 1;

        let fetcher = self.fetcher.clone();
        let results = self.fetch_tx.clone();
        tokio::spawn(async move {
            // ignored if the driver stopped meanwhile
            let _ = results.send(fetcher.fetch().await);
        });
    }

    fn on_fetch(&mut self, result: SyncResult<SessionSnapshot>) {
        self.fetch_in_flight = false;
        let now = self.now_ms();
        match result {
            Ok(snapshot) => {
                let outcome = self.shared.reconciler.lock().apply_snapshot(&snapshot, now);
                if outcome.changed() {
                    self.poll.record_change(now);
                } else if self.reconnect.phase() == ReconnectPhase::Connected {
                    self.poll.record_quiet(now);
                } else {
                    // polling is the only source; stay at the base interval
                    self.poll.channel_unhealthy();
                }
                trace!(?outcome, interval = ?self.poll.current_interval(), "poll result");
            }
            Err(e) => {
                warn!(error = %e, "snapshot poll failed");
            }
        }
    }

    fn on_quality_tick(&mut self) {
        let now = self.now_ms();
        self.shared.reconciler.lock().refresh_quality(now);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
