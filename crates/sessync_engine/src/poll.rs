//! Adaptive poll scheduling.
//!
//! Polling is the fallback path: it runs whether or not the push channel is
//! up, skips ticks while push data is fresh, and stretches its interval while
//! the remote side stays quiet.

use crate::config::PollConfig;
use crate::quality::ConnectionQuality;
use crate::state::ConnectionInfo;
use std::time::Duration;

/// Decides when the next snapshot fetch happens.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    policy: PollConfig,
    current: Duration,
    last_change_ms: Option<u64>,
}

impl PollScheduler {
    /// Creates a scheduler at the base interval.
    pub fn new(policy: PollConfig) -> Self {
        let current = policy.interval;
        Self {
            policy,
            current,
            last_change_ms: None,
        }
    }

    /// Interval until the next tick.
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// Returns true if this tick should not fetch because the push channel
    /// delivered data within the skip threshold.
    pub fn should_skip(&self, connection: &ConnectionInfo, now_ms: u64) -> bool {
        if !connection.is_connected() || connection.quality != ConnectionQuality::Excellent {
            return false;
        }
        let Some(last_update) = connection.last_update else {
            return false;
        };
        Duration::from_millis(now_ms.saturating_sub(last_update)) < self.policy.skip_threshold
    }

    /// A poll or push detected a content change.
    pub fn record_change(&mut self, now_ms: u64) {
        self.last_change_ms = Some(now_ms);
        self.current = self.policy.interval;
    }

    /// A poll completed without a change; grows the interval once the quiet
    /// period has elapsed.
    pub fn record_quiet(&mut self, now_ms: u64) {
        let since = *self.last_change_ms.get_or_insert(now_ms);
        if Duration::from_millis(now_ms.saturating_sub(since)) >= self.policy.quiet_period {
            self.current = self.policy.grow_interval(self.current);
        }
    }

    /// The push channel is degraded; fall back to the base interval.
    pub fn channel_unhealthy(&mut self) {
        self.current = self.policy.interval;
    }

    /// Back to the initial state.
    pub fn reset(&mut self) {
        self.current = self.policy.interval;
        self.last_change_ms = None;
    }
}
