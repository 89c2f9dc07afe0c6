//! The state reconciler: the only writer of [`SyncedState`].
//!
//! Push frames and poll snapshots are both turned into a [`StatePatch`] and
//! funneled through a single synchronous `commit`. Every update carries a
//! logical timestamp; anything older than the committed watermark is
//! discarded, so a late snapshot can never overwrite newer push data.

use crate::quality;
use crate::state::{ConnectionStatus, EngineStats, SessionView, SyncedState};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use sessync_protocol::{
    LogicalTimestamp, PhaseProgress, PushFrame, ResourceUsage, SessionSnapshot, SessionStatus,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// A state listener.
pub type Listener = Arc<dyn Fn(&SyncedState) + Send + Sync>;

/// Result of offering an update to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The update was applied and published.
    Committed {
        /// Whether significant fields differ from the previous state.
        changed: bool,
    },
    /// Same timestamp and same content as the committed state; dropped.
    Duplicate,
    /// Older than the committed state; discarded.
    Stale,
}

impl CommitOutcome {
    /// Returns true if the update was applied.
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { .. })
    }

    /// Returns true if the update changed significant fields.
    pub fn changed(&self) -> bool {
        matches!(self, CommitOutcome::Committed { changed: true })
    }
}

/// The fields an update wants to set.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StatePatch {
    session: Option<SessionView>,
    status: Option<SessionStatus>,
    duration_ms: Option<u64>,
    usage: Option<ResourceUsage>,
    phase: Option<PhaseProgress>,
}

impl StatePatch {
    /// Maps a push frame. Heartbeats carry no data and map to `None`.
    pub(crate) fn from_frame(frame: &PushFrame) -> Option<Self> {
        let patch = match frame {
            PushFrame::Session { session, .. } => StatePatch {
                session: Some(SessionView::from(session.clone())),
                ..Default::default()
            },
            PushFrame::Metrics {
                duration_ms, phase, ..
            } => StatePatch {
                duration_ms: Some(*duration_ms),
                phase: phase.clone(),
                ..Default::default()
            },
            PushFrame::Budget { usage, .. } => StatePatch {
                usage: Some(usage.clone()),
                ..Default::default()
            },
            PushFrame::Status { status, .. } => StatePatch {
                status: Some(*status),
                ..Default::default()
            },
            PushFrame::Heartbeat { .. } => return None,
        };
        Some(patch)
    }

    /// Maps a snapshot. Usage and phase are only replaced when reported.
    pub(crate) fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        StatePatch {
            session: Some(SessionView::from(snapshot.session.clone())),
            usage: snapshot.usage.clone(),
            phase: snapshot.phase.clone(),
            ..Default::default()
        }
    }

    fn apply_to(&self, state: &mut SyncedState) {
        if let Some(ref session) = self.session {
            state.session = session.clone();
        }
        if let SessionView::Present(ref mut info) = state.session {
            if let Some(status) = self.status {
                info.status = status;
            }
            if let Some(duration_ms) = self.duration_ms {
                info.duration_ms = duration_ms;
            }
        }
        if let Some(ref usage) = self.usage {
            state.resource_usage = usage.clone();
        }
        if let Some(ref phase) = self.phase {
            state.phase = phase.clone();
        }
    }
}

#[derive(Default)]
struct SubscriberSet {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
    closed: bool,
}

/// Registry of state listeners, shared between the reconciler and the facade.
///
/// Publishing and the initial delivery to a new listener are serialized, so
/// every listener sees states in commit order and ends on the latest one.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<SubscriberSet>>,
    // reentrant so a listener can subscribe from inside its callback
    delivery: Arc<ReentrantMutex<()>>,
}

impl Subscribers {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Returns `None` once the registry is closed.
    pub fn insert(&self, listener: Listener) -> Option<u64> {
        let mut set = self.inner.lock();
        if set.closed {
            return None;
        }
        let id = set.next_id;
        set.next_id += 1;
        set.listeners.push((id, listener));
        Some(id)
    }

    /// Registers a listener and immediately calls it with the state held by
    /// `current`. Returns `None` once the registry is closed.
    pub fn subscribe(
        &self,
        listener: Listener,
        current: &watch::Receiver<SyncedState>,
    ) -> Option<u64> {
        let _order = self.delivery.lock();
        let id = self.insert(Arc::clone(&listener))?;
        let state = current.borrow().clone();
        deliver(id, &listener, &state);
        Some(id)
    }

    /// Removes a listener. Returns false if it was not registered.
    pub fn remove(&self, id: u64) -> bool {
        let mut set = self.inner.lock();
        let before = set.listeners.len();
        set.listeners.retain(|(existing, _)| *existing != id);
        set.listeners.len() != before
    }

    /// Drops every listener and refuses new ones.
    pub fn close(&self) {
        let mut set = self.inner.lock();
        set.closed = true;
        set.listeners.clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener with `state`, isolating panics.
    ///
    /// The registry lock is released before listeners run, so a listener
    /// may subscribe or unsubscribe from inside its callback.
    pub fn notify(&self, state: &SyncedState) {
        let _order = self.delivery.lock();
        let listeners: Vec<(u64, Listener)> = self.inner.lock().listeners.clone();
        for (id, listener) in listeners {
            deliver(id, &listener, state);
        }
    }

    /// Stores `state` in `publisher` and notifies every listener as one step
    /// with respect to [`Subscribers::subscribe`].
    pub(crate) fn publish(&self, publisher: &watch::Sender<SyncedState>, state: &SyncedState) {
        let _order = self.delivery.lock();
        publisher.send_replace(state.clone());
        self.notify(state);
    }
}

/// Calls one listener; a panic is logged and swallowed.
pub(crate) fn deliver(id: u64, listener: &Listener, state: &SyncedState) -> bool {
    let result = catch_unwind(AssertUnwindSafe(|| listener(state)));
    if result.is_err() {
        warn!(subscriber = id, "subscriber panicked during notification");
    }
    result.is_ok()
}

/// Owner of the synchronized state.
pub struct Reconciler {
    state: SyncedState,
    watermark: Option<LogicalTimestamp>,
    subscribers: Subscribers,
    publisher: watch::Sender<SyncedState>,
    stats: Arc<RwLock<EngineStats>>,
}

impl Reconciler {
    /// Creates a reconciler holding the default state.
    pub fn new(subscribers: Subscribers, stats: Arc<RwLock<EngineStats>>) -> Self {
        let state = SyncedState::default();
        let (publisher, _) = watch::channel(state.clone());
        Self {
            state,
            watermark: None,
            subscribers,
            publisher,
            stats,
        }
    }

    /// The last committed state.
    pub fn state(&self) -> &SyncedState {
        &self.state
    }

    /// Highest logical timestamp committed so far.
    pub fn watermark(&self) -> Option<LogicalTimestamp> {
        self.watermark
    }

    /// A receiver that always holds the last published state.
    pub fn watch(&self) -> watch::Receiver<SyncedState> {
        self.publisher.subscribe()
    }

    /// Applies a push frame received at `now_ms`.
    ///
    /// Heartbeats never reach `commit`; they only refresh quality.
    pub fn apply_push_event(&mut self, frame: &PushFrame, now_ms: u64) -> CommitOutcome {
        match StatePatch::from_frame(frame) {
            Some(patch) => self.commit(frame.timestamp(), patch, now_ms),
            None => {
                self.refresh_quality(now_ms);
                CommitOutcome::Duplicate
            }
        }
    }

    /// Applies a snapshot received at `now_ms`.
    pub fn apply_snapshot(&mut self, snapshot: &SessionSnapshot, now_ms: u64) -> CommitOutcome {
        self.commit(snapshot.timestamp, StatePatch::from_snapshot(snapshot), now_ms)
    }

    pub(crate) fn commit(
        &mut self,
        timestamp: LogicalTimestamp,
        patch: StatePatch,
        now_ms: u64,
    ) -> CommitOutcome {
        if let Some(watermark) = self.watermark {
            if timestamp < watermark {
                self.stats.write().stale_discarded += 1;
                debug!(timestamp, watermark, "discarding stale update");
                return CommitOutcome::Stale;
            }
        }

        let mut next = self.state.clone();
        patch.apply_to(&mut next);
        let changed = !self.state.same_content(&next);

        if !changed && self.watermark == Some(timestamp) {
            self.stats.write().duplicates += 1;
            trace!(timestamp, "dropping duplicate update");
            return CommitOutcome::Duplicate;
        }

        let last_update = self
            .state
            .connection
            .last_update
            .map_or(now_ms, |previous| previous.max(now_ms));
        next.connection.last_update = Some(last_update);
        next.connection.last_timestamp = Some(timestamp);
        next.connection.quality = quality::estimate(now_ms, Some(last_update));

        self.watermark = Some(timestamp);
        self.state = next;
        self.stats.write().commits += 1;
        trace!(timestamp, changed, "committed update");
        self.publish();

        CommitOutcome::Committed { changed }
    }

    /// Re-evaluates connection quality; publishes only if the label changed.
    pub fn refresh_quality(&mut self, now_ms: u64) -> bool {
        let quality = quality::estimate(now_ms, self.state.connection.last_update);
        self.update_meta(|state| state.connection.quality = quality)
    }

    /// Moves the connection status to `target`, publishing every
    /// intermediate status on the way.
    pub fn set_connection_status(&mut self, target: ConnectionStatus) {
        while self.state.connection.status != target {
            let step = self.state.connection.status.step_toward(target);
            debug!(from = self.state.connection.status.as_str(), to = step.as_str(), "connection status");
            self.update_meta(|state| state.connection.status = step);
        }
    }

    /// Records the reconnect attempt counter.
    pub fn set_reconnect_attempts(&mut self, attempts: u32) -> bool {
        self.update_meta(|state| state.connection.reconnect_attempts = attempts)
    }

    /// Enters the terminal give-up state with an error message.
    pub fn mark_gave_up(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.stats.write().last_error = Some(error.clone());
        self.update_meta(|state| {
            state.connection.gave_up = true;
            state.ui.error = Some(error);
        });
    }

    /// Marks `initialize` as in progress and clears previous errors.
    pub fn begin_initialize(&mut self) {
        self.update_meta(|state| {
            state.ui.loading = true;
            state.ui.error = None;
            state.connection.gave_up = false;
        });
    }

    /// Marks `initialize` as finished.
    pub fn finish_initialize(&mut self, error: Option<String>) {
        if let Some(ref error) = error {
            self.stats.write().last_error = Some(error.clone());
        }
        self.update_meta(|state| {
            state.ui.loading = false;
            state.ui.initialized = error.is_none();
            state.ui.error = error;
        });
    }

    /// Applies a change to transport or lifecycle fields and publishes it
    /// if anything differs. Remote data must go through `commit`.
    fn update_meta(&mut self, change: impl FnOnce(&mut SyncedState)) -> bool {
        let mut next = self.state.clone();
        change(&mut next);
        if next == self.state {
            return false;
        }
        self.state = next;
        self.publish();
        true
    }

    fn publish(&self) {
        self.subscribers.publish(&self.publisher, &self.state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::ConnectionQuality;
    use sessync_protocol::SessionInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reconciler() -> (Reconciler, Subscribers) {
        let subscribers = Subscribers::new();
        let reconciler = Reconciler::new(subscribers.clone(), Arc::default());
        (reconciler, subscribers)
    }

    fn counting(subscribers: &Subscribers) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        subscribers.insert(Arc::new(move |_: &SyncedState| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        count
    }

    fn active_snapshot(timestamp: u64, used: u64) -> SessionSnapshot {
        SessionSnapshot::with_session(timestamp, SessionInfo::active("s-1", 1_000))
            .usage(ResourceUsage::new(used, 1_000))
    }

    #[test]
    fn applying_same_snapshot_twice_commits_once() {
        let (mut reconciler, subscribers) = reconciler();
        let count = counting(&subscribers);

        let snapshot = active_snapshot(10, 100);
        assert_eq!(
            reconciler.apply_snapshot(&snapshot, 1_000),
            CommitOutcome::Committed { changed: true }
        );
        assert_eq!(reconciler.apply_snapshot(&snapshot, 2_000), CommitOutcome::Duplicate);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.state().connection.last_update, Some(1_000));
    }

    #[test]
    fn newer_identical_content_refreshes_timestamp() {
        let (mut reconciler, _) = reconciler();
        reconciler.apply_snapshot(&active_snapshot(10, 100), 1_000);

        let outcome = reconciler.apply_snapshot(&active_snapshot(11, 100), 3_000);
        assert_eq!(outcome, CommitOutcome::Committed { changed: false });
        assert_eq!(reconciler.state().connection.last_update, Some(3_000));
        assert_eq!(reconciler.watermark(), Some(11));
    }

    #[test]
    fn stale_snapshot_never_overwrites_push() {
        let (mut reconciler, _) = reconciler();
        let frame = PushFrame::Budget {
            timestamp: 100,
            usage: ResourceUsage::new(700, 1_000),
        };
        assert!(reconciler.apply_push_event(&frame, 5_000).is_committed());

        let late = active_snapshot(90, 200);
        assert_eq!(reconciler.apply_snapshot(&late, 6_000), CommitOutcome::Stale);
        assert_eq!(reconciler.state().resource_usage.used, 700);
        assert_eq!(reconciler.state().connection.last_update, Some(5_000));
    }

    #[test]
    fn frames_with_equal_timestamp_and_new_content_commit() {
        let (mut reconciler, _) = reconciler();
        reconciler.apply_snapshot(&active_snapshot(5, 0), 0);

        let metrics = PushFrame::Metrics {
            timestamp: 6,
            duration_ms: 30_000,
            phase: Some(PhaseProgress::new("build", 1, 3)),
        };
        let budget = PushFrame::Budget {
            timestamp: 6,
            usage: ResourceUsage::new(50, 1_000),
        };
        assert!(reconciler.apply_push_event(&metrics, 100).changed());
        assert!(reconciler.apply_push_event(&budget, 100).changed());

        let state = reconciler.state();
        assert_eq!(state.session.info().unwrap().duration_ms, 30_000);
        assert_eq!(state.phase.label, "build");
        assert_eq!(state.resource_usage.used, 50);
    }

    #[test]
    fn status_frame_updates_present_session() {
        let (mut reconciler, _) = reconciler();
        reconciler.apply_snapshot(&active_snapshot(1, 0), 0);

        let frame = PushFrame::Status {
            timestamp: 2,
            status: SessionStatus::Paused,
        };
        assert!(reconciler.apply_push_event(&frame, 10).changed());
        assert_eq!(reconciler.state().session.status(), Some(SessionStatus::Paused));
    }

    #[test]
    fn status_frame_without_session_changes_nothing() {
        let (mut reconciler, _) = reconciler();
        let frame = PushFrame::Status {
            timestamp: 2,
            status: SessionStatus::Paused,
        };
        assert_eq!(
            reconciler.apply_push_event(&frame, 10),
            CommitOutcome::Committed { changed: false }
        );
        assert_eq!(reconciler.state().session, SessionView::Unknown);
    }

    #[test]
    fn session_frame_without_session_confirms_absence() {
        let (mut reconciler, _) = reconciler();
        reconciler.apply_snapshot(&active_snapshot(1, 0), 0);

        let frame = PushFrame::Session {
            timestamp: 2,
            session: None,
        };
        reconciler.apply_push_event(&frame, 10);
        assert_eq!(reconciler.state().session, SessionView::Absent);
    }

    #[test]
    fn heartbeat_does_not_commit() {
        let (mut reconciler, subscribers) = reconciler();
        reconciler.apply_snapshot(&active_snapshot(1, 0), 0);
        let count = counting(&subscribers);

        let outcome = reconciler.apply_push_event(&PushFrame::Heartbeat { timestamp: 50 }, 1_000);
        assert_eq!(outcome, CommitOutcome::Duplicate);
        assert_eq!(reconciler.watermark(), Some(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // the age crosses a threshold, so the heartbeat publishes a new label
        reconciler.apply_push_event(&PushFrame::Heartbeat { timestamp: 51 }, 6_000);
        assert_eq!(reconciler.state().connection.quality, ConnectionQuality::Good);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(reconciler.state().connection.last_update, Some(0));
    }

    #[test]
    fn last_update_never_moves_backwards() {
        let (mut reconciler, _) = reconciler();
        reconciler.apply_snapshot(&active_snapshot(1, 0), 5_000);
        reconciler.apply_snapshot(&active_snapshot(2, 1), 4_000);
        assert_eq!(reconciler.state().connection.last_update, Some(5_000));
    }

    #[test]
    fn status_transitions_are_published_in_order() {
        let (mut reconciler, subscribers) = reconciler();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        subscribers.insert(Arc::new(move |state: &SyncedState| {
            sink.lock().push(state.connection.status);
        }));

        reconciler.set_connection_status(ConnectionStatus::Connected);
        reconciler.set_connection_status(ConnectionStatus::Disconnected);

        assert_eq!(
            *seen.lock(),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Error,
                ConnectionStatus::Disconnected,
            ]
        );
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let (mut reconciler, subscribers) = reconciler();
        subscribers.insert(Arc::new(|_: &SyncedState| panic!("listener failure")));
        let count = counting(&subscribers);

        reconciler.apply_snapshot(&active_snapshot(1, 0), 0);
        reconciler.apply_snapshot(&active_snapshot(2, 5), 0);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn watch_receiver_tracks_commits() {
        let (mut reconciler, _) = reconciler();
        let rx = reconciler.watch();
        reconciler.apply_snapshot(&active_snapshot(3, 42), 0);
        assert_eq!(rx.borrow().resource_usage.used, 42);
    }

    #[test]
    fn late_subscribers_end_on_the_latest_state() {
        const COMMITS: u64 = 2_000;
        let (reconciler, subscribers) = reconciler();
        let current = reconciler.watch();
        let reconciler = Arc::new(Mutex::new(reconciler));

        let writer = {
            let reconciler = Arc::clone(&reconciler);
            std::thread::spawn(move || {
                for ts in 1..=COMMITS {
                    reconciler.lock().apply_snapshot(&active_snapshot(ts, ts), ts);
                }
            })
        };

        let mut last_seen = Vec::new();
        loop {
            let seen = Arc::new(Mutex::new(None));
            let sink = Arc::clone(&seen);
            subscribers.subscribe(
                Arc::new(move |state: &SyncedState| {
                    *sink.lock() = Some(state.resource_usage.used);
                }),
                &current,
            );
            last_seen.push(seen);
            if writer.is_finished() {
                break;
            }
        }
        writer.join().unwrap();

        let latest = current.borrow().resource_usage.used;
        assert_eq!(latest, COMMITS);
        for seen in &last_seen {
            assert_eq!(*seen.lock(), Some(latest));
        }
    }

    #[test]
    fn subscribe_delivers_current_state_first() {
        let (mut reconciler, subscribers) = reconciler();
        reconciler.apply_snapshot(&active_snapshot(1, 7), 0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = subscribers.subscribe(
            Arc::new(move |state: &SyncedState| sink.lock().push(state.resource_usage.used)),
            &reconciler.watch(),
        );
        assert!(id.is_some());
        reconciler.apply_snapshot(&active_snapshot(2, 9), 0);

        assert_eq!(*seen.lock(), vec![7, 9]);
    }

    #[test]
    fn closed_registry_rejects_listeners() {
        let subscribers = Subscribers::new();
        let id = subscribers.insert(Arc::new(|_: &SyncedState| {})).unwrap();
        assert!(subscribers.remove(id));
        assert!(!subscribers.remove(id));

        subscribers.close();
        assert!(subscribers.insert(Arc::new(|_: &SyncedState| {})).is_none());
        assert!(subscribers.is_empty());
    }

    #[test]
    fn initialize_flags() {
        let (mut reconciler, _) = reconciler();
        reconciler.begin_initialize();
        assert!(reconciler.state().ui.loading);

        reconciler.finish_initialize(Some("no provider".into()));
        let ui = &reconciler.state().ui;
        assert!(!ui.loading);
        assert!(!ui.initialized);
        assert_eq!(ui.error.as_deref(), Some("no provider"));

        reconciler.begin_initialize();
        reconciler.finish_initialize(None);
        assert!(reconciler.state().ui.initialized);
        assert!(reconciler.state().ui.error.is_none());
    }
}
