//! Test fixtures and engine helpers.
//!
//! Provides sample protocol values, a configuration tuned for paused-clock
//! tests and a subscriber that records every state it sees.

use parking_lot::Mutex;
use sessync_engine::{
    EngineConfig, PollConfig, PushTransport, SnapshotTransport, Subscription, SyncEngine,
    SyncedState,
};
use sessync_protocol::{
    LogicalTimestamp, PhaseProgress, PushFrame, ResourceUsage, SessionInfo, SessionSnapshot,
    SessionStatus,
};
use std::sync::{Arc, Once};
use std::time::Duration;

/// Session id used by the fixtures.
pub const SESSION_ID: &str = "session-1";

/// An active session started at `start_time`.
pub fn active_session(start_time: u64) -> SessionInfo {
    SessionInfo::active(SESSION_ID, start_time)
}

/// A snapshot confirming that no session is active.
pub fn idle_snapshot(timestamp: LogicalTimestamp) -> SessionSnapshot {
    SessionSnapshot::empty(timestamp)
}

/// A snapshot carrying an active session with some usage.
pub fn active_snapshot(timestamp: LogicalTimestamp, used: u64) -> SessionSnapshot {
    SessionSnapshot::with_session(timestamp, active_session(1_000))
        .usage(ResourceUsage::new(used, 100_000))
        .phase(PhaseProgress::new("execute", 1, 4))
}

/// A `session` frame announcing an active session.
pub fn session_started(timestamp: LogicalTimestamp, start_time: u64) -> PushFrame {
    PushFrame::Session {
        timestamp,
        session: Some(active_session(start_time)),
    }
}

/// A `budget` frame.
pub fn budget_frame(timestamp: LogicalTimestamp, used: u64) -> PushFrame {
    PushFrame::Budget {
        timestamp,
        usage: ResourceUsage::new(used, 100_000),
    }
}

/// A `status` frame.
pub fn status_frame(timestamp: LogicalTimestamp, status: SessionStatus) -> PushFrame {
    PushFrame::Status { timestamp, status }
}

/// Engine configuration with short intervals and liveness detection off.
///
/// Base poll interval 1 s, five retries, backoff doubling up to 30 s.
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_request_timeout(Duration::from_secs(2))
        .with_heartbeat_timeout(None)
        .with_quality_check_interval(Duration::from_millis(500))
        .with_poll(
            PollConfig::new(Duration::from_secs(1))
                .with_max_retries(5)
                .with_backoff_multiplier(2.0)
                .with_max_interval(Duration::from_secs(30))
                .with_quiet_period(Duration::from_secs(30))
                .with_skip_threshold(Duration::from_secs(10)),
        )
}

/// Records every state delivered to one subscriber.
#[derive(Clone, Default)]
pub struct StateRecorder {
    states: Arc<Mutex<Vec<SyncedState>>>,
}

impl StateRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a new recorder to `engine`.
    pub fn attach<P, S>(engine: &SyncEngine<P, S>) -> (Self, Subscription)
    where
        P: PushTransport,
        S: SnapshotTransport,
    {
        let recorder = Self::new();
        let sink = recorder.clone();
        let subscription = engine.subscribe(move |state| sink.record(state));
        (recorder, subscription)
    }

    /// Appends a state.
    pub fn record(&self, state: &SyncedState) {
        self.states.lock().push(state.clone());
    }

    /// All recorded states, oldest first.
    pub fn states(&self) -> Vec<SyncedState> {
        self.states.lock().clone()
    }

    /// Number of recorded states.
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recent state.
    pub fn last(&self) -> Option<SyncedState> {
        self.states.lock().last().cloned()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.states.lock().clear();
    }

    /// Recorded states with consecutive repeats of `key` collapsed.
    pub fn distinct_by<T, F>(&self, key: F) -> Vec<T>
    where
        T: PartialEq,
        F: Fn(&SyncedState) -> T,
    {
        let mut out: Vec<T> = Vec::new();
        for state in self.states.lock().iter() {
            let value = key(state);
            if out.last() != Some(&value) {
                out.push(value);
            }
        }
        out
    }
}

/// Installs a `tracing` subscriber for tests once per process.
///
/// Honors `RUST_LOG`; defaults to `warn` for everything and `debug` for the
/// engine.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,sessync_engine=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_are_valid() {
        assert!(active_snapshot(1, 10).validate().is_ok());
        assert!(session_started(2, 5).validate().is_ok());
        assert!(fast_config().validate().is_ok());
    }

    #[test]
    fn recorder_collapses_repeats() {
        let recorder = StateRecorder::new();
        let mut state = SyncedState::default();
        recorder.record(&state);
        recorder.record(&state);
        state.ui.loading = true;
        recorder.record(&state);

        assert_eq!(recorder.len(), 3);
        assert_eq!(recorder.distinct_by(|s| s.ui.loading), vec![false, true]);
        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn tracing_init_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
        tracing::debug!("tracing initialized");
    }
}
