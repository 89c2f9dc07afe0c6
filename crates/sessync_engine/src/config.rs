//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Configuration for the engine as a whole.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to every snapshot fetch and control command.
    pub request_timeout: Duration,
    /// Limit on establishing a push connection; an expired handshake counts
    /// as a failed connect.
    pub connect_timeout: Duration,
    /// Close the push channel when no frame arrives for this long.
    /// `None` disables liveness detection.
    pub heartbeat_timeout: Option<Duration>,
    /// How often connection quality is re-evaluated without new data.
    pub quality_check_interval: Duration,
    /// Polling, backoff and retry tuning.
    pub poll: PollConfig,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            heartbeat_timeout: Some(Duration::from_secs(45)),
            quality_check_interval: Duration::from_secs(1),
            poll: PollConfig::default(),
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the push connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the heartbeat timeout.
    pub fn with_heartbeat_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the quality check interval.
    pub fn with_quality_check_interval(mut self, interval: Duration) -> Self {
        self.quality_check_interval = interval;
        self
    }

    /// Sets the poll configuration.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.request_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("request_timeout must be non-zero".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(SyncError::InvalidConfig("connect_timeout must be non-zero".into()));
        }
        if self.quality_check_interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "quality_check_interval must be non-zero".into(),
            ));
        }
        if self.heartbeat_timeout.is_some_and(|t| t.is_zero()) {
            return Err(SyncError::InvalidConfig("heartbeat_timeout must be non-zero".into()));
        }
        self.poll.validate()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Tuning for polling and reconnection backoff.
///
/// Immutable once handed to the engine; only the derived current poll
/// interval varies at runtime.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Base poll interval, also the first backoff delay.
    pub interval: Duration,
    /// Reconnect attempts (and initial fetch retries) before giving up.
    pub max_retries: u32,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Ceiling for both backoff delays and the poll interval.
    pub max_interval: Duration,
    /// Factor applied to the poll interval after a quiet period.
    pub growth_factor: f64,
    /// Time without a detected change before the poll interval grows.
    pub quiet_period: Duration,
    /// A poll is skipped when the push channel delivered data this recently.
    pub skip_threshold: Duration,
}

impl PollConfig {
    /// Creates a poll configuration with the given base interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_retries: 5,
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(30),
            growth_factor: 1.2,
            quiet_period: Duration::from_secs(30),
            skip_threshold: Duration::from_secs(10),
        }
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the interval ceiling.
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Sets the poll interval growth factor.
    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Sets the quiet period.
    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }

    /// Sets the skip threshold.
    pub fn with_skip_threshold(mut self, threshold: Duration) -> Self {
        self.skip_threshold = threshold;
        self
    }

    /// Calculates the delay before retry `attempt` (1-indexed).
    ///
    /// `min(interval * multiplier^(attempt - 1), max_interval)`; attempt 0 has no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        if attempt == 1 {
            return self.interval.min(self.max_interval);
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_secs = self.interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max_secs = self.max_interval.as_secs_f64();

        if !delay_secs.is_finite() || delay_secs >= max_secs {
            self.max_interval
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Lengthens a poll interval by the growth factor, within bounds.
    pub fn grow_interval(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.growth_factor;
        let max_secs = self.max_interval.as_secs_f64();
        let next = if !grown.is_finite() || grown >= max_secs {
            self.max_interval
        } else {
            Duration::from_secs_f64(grown)
        };
        next.max(self.interval)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.interval.is_zero() {
            return Err(SyncError::InvalidConfig("poll interval must be non-zero".into()));
        }
        if self.max_interval < self.interval {
            return Err(SyncError::InvalidConfig(format!(
                "max_interval {:?} is below interval {:?}",
                self.max_interval, self.interval
            )));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(SyncError::InvalidConfig(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if !(self.growth_factor >= 1.0 && self.growth_factor.is_finite()) {
            return Err(SyncError::InvalidConfig(format!(
                "growth_factor must be >= 1.0, got {}",
                self.growth_factor
            )));
        }
        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
