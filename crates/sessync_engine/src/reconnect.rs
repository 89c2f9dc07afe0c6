//! Reconnection state machine for the push channel.

use crate::config::PollConfig;
use std::time::Duration;

/// Where the reconnection controller stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    /// Not started, or stopped.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The channel is open.
    Connected,
    /// The channel closed and nothing is scheduled yet.
    Disconnected,
    /// A retry is waiting on its backoff delay.
    ReconnectScheduled,
    /// The retry budget is spent.
    GaveUp,
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Retry after `delay`.
    Retry {
        /// 1-indexed attempt number.
        attempt: u32,
        /// Backoff before the attempt.
        delay: Duration,
    },
    /// Stop reconnecting.
    GiveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Tracks attempts and backoff for one push channel.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    policy: PollConfig,
    phase: ReconnectPhase,
    attempt: u32,
}

impl ReconnectController {
    /// Creates an idle controller.
    pub fn new(policy: PollConfig) -> Self {
        Self {
            policy,
            phase: ReconnectPhase::Idle,
            attempt: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    /// Attempts made since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Returns true once the controller gave up.
    pub fn is_terminal(&self) -> bool {
        self.phase == ReconnectPhase::GaveUp
    }

    /// Starts a fresh connection cycle.
    pub fn start(&mut self) {
        self.phase = ReconnectPhase::Connecting;
        self.attempt = 0;
    }

    /// A scheduled retry is about to connect.
    pub fn begin_attempt(&mut self) {
        if self.phase == ReconnectPhase::ReconnectScheduled {
            self.phase = ReconnectPhase::Connecting;
        }
    }

    /// The channel opened; the attempt counter resets.
    pub fn on_connected(&mut self) {
        self.phase = ReconnectPhase::Connected;
        self.attempt = 0;
    }

    /// The channel closed or a connect failed.
    ///
    /// Returns `None` when the controller is idle or already gave up.
    pub fn on_failure(&mut self) -> Option<ReconnectDecision> {
        match self.phase {
            ReconnectPhase::Idle | ReconnectPhase::GaveUp => return None,
            _ => {}
        }
        self.phase = ReconnectPhase::Disconnected;

        if self.attempt >= self.policy.max_retries {
            self.phase = ReconnectPhase::GaveUp;
            return Some(ReconnectDecision::GiveUp {
                attempts: self.attempt,
            });
        }

        self.attempt += 1;
        self.phase = ReconnectPhase::ReconnectScheduled;
        Some(ReconnectDecision::Retry {
            attempt: self.attempt,
            delay: self.policy.delay_for_attempt(self.attempt),
        })
    }

    /// Stops reconnecting.
    pub fn stop(&mut self) {
        self.phase = ReconnectPhase::Idle;
        self.attempt = 0;
    }
}
