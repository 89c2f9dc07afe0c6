//! Session payloads shared by frames and snapshots.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Lifecycle status of the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The session is running.
    Active,
    /// The session is paused.
    Paused,
    /// The session has finished.
    Completed,
}

impl SessionStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
        }
    }

    /// Returns true if the session can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }
}

/// Identity and timing of the remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Provider-assigned session identifier.
    pub id: String,
    /// Current status.
    pub status: SessionStatus,
    /// Start time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub start_time: Option<u64>,
    /// Accumulated duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

impl SessionInfo {
    /// Creates an active session with no accumulated duration.
    pub fn active(id: impl Into<String>, start_time: u64) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::Active,
            start_time: Some(start_time),
            duration_ms: 0,
        }
    }

    /// Sets the status.
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the accumulated duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub(crate) fn validate(&self) -> ProtocolResult<()> {
        if self.id.trim().is_empty() {
            return Err(ProtocolError::invalid("empty session id"));
        }
        Ok(())
    }
}

/// Resource consumption against the session budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// Units consumed so far.
    pub used: u64,
    /// Total units available (0 means unbounded).
    pub budget: u64,
    /// Provider's projection of total consumption at session end.
    #[serde(default)]
    pub projected: Option<u64>,
}

impl ResourceUsage {
    /// Creates a usage record.
    pub fn new(used: u64, budget: u64) -> Self {
        Self {
            used,
            budget,
            projected: None,
        }
    }

    /// Sets the projected total.
    pub fn with_projection(mut self, projected: u64) -> Self {
        self.projected = Some(projected);
        self
    }

    /// Units left before the budget is exhausted.
    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.used)
    }

    /// Consumed share of the budget in percent, `None` for an unbounded budget.
    pub fn percent_used(&self) -> Option<f64> {
        if self.budget == 0 {
            None
        } else {
            Some(self.used as f64 * 100.0 / self.budget as f64)
        }
    }

    /// Returns true if the projection exceeds the budget.
    pub fn projected_overrun(&self) -> bool {
        match self.projected {
            Some(projected) => self.budget > 0 && projected > self.budget,
            None => false,
        }
    }
}

/// Coarse progress through the session's stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseProgress {
    /// Current stage label.
    pub label: String,
    /// Completed steps.
    pub completed: u32,
    /// Total steps.
    pub total: u32,
}

impl PhaseProgress {
    /// Creates a progress record.
    pub fn new(label: impl Into<String>, completed: u32, total: u32) -> Self {
        Self {
            label: label.into(),
            completed,
            total,
        }
    }

    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.completed) / f64::from(self.total)
        }
    }

    pub(crate) fn validate(&self) -> ProtocolResult<()> {
        if self.completed > self.total {
            return Err(ProtocolError::invalid(format!(
                "phase progress {}/{} exceeds total",
                self.completed, self.total
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_derived_values() {
        let usage = ResourceUsage::new(250, 1000).with_projection(1200);
        assert_eq!(usage.remaining(), 750);
        assert_eq!(usage.percent_used(), Some(25.0));
        assert!(usage.projected_overrun());

        let unbounded = ResourceUsage::new(10, 0);
        assert_eq!(unbounded.percent_used(), None);
        assert_eq!(unbounded.remaining(), 0);
        assert!(!unbounded.projected_overrun());
    }

    #[test]
    fn usage_overrun_saturates() {
        let usage = ResourceUsage::new(1500, 1000);
        assert_eq!(usage.remaining(), 0);
    }

    #[test]
    fn phase_fraction() {
        assert_eq!(PhaseProgress::new("build", 1, 4).fraction(), 0.25);
        assert_eq!(PhaseProgress::default().fraction(), 0.0);
    }

    #[test]
    fn phase_validation() {
        assert!(PhaseProgress::new("test", 3, 3).validate().is_ok());
        assert!(PhaseProgress::new("test", 4, 3).validate().is_err());
    }

    #[test]
    fn session_validation() {
        assert!(SessionInfo::active("s-1", 0).validate().is_ok());
        assert!(SessionInfo::active("  ", 0).validate().is_err());
    }

    #[test]
    fn session_json_shape() {
        let info = SessionInfo::active("s-1", 1_700_000_000_000).with_duration_ms(42);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["startTime"], 1_700_000_000_000u64);
        assert_eq!(json["durationMs"], 42);
    }

    #[test]
    fn session_optional_fields_default() {
        let info: SessionInfo = serde_json::from_str(r#"{"id":"s-9","status":"paused"}"#).unwrap();
        assert_eq!(info.status, SessionStatus::Paused);
        assert_eq!(info.start_time, None);
        assert_eq!(info.duration_ms, 0);
    }

    #[test]
    fn status_names() {
        assert_eq!(SessionStatus::Active.as_str(), "active");
        assert!(SessionStatus::Completed.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }
}
