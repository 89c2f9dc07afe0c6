//! Snapshot endpoint response.

use crate::error::{ProtocolError, ProtocolResult};
use crate::session::{PhaseProgress, ResourceUsage, SessionInfo};
use crate::LogicalTimestamp;
use serde::{Deserialize, Serialize};

/// A complete point-in-time view of the session.
///
/// `session: None` is a valid answer meaning "no active session"; it is
/// distinct from a transport failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Logical timestamp at which the provider produced the snapshot.
    pub timestamp: LogicalTimestamp,
    /// The active session, if any.
    #[serde(default)]
    pub session: Option<SessionInfo>,
    /// Current usage, if the provider tracks it.
    #[serde(default)]
    pub usage: Option<ResourceUsage>,
    /// Current stage progress, if reported.
    #[serde(default)]
    pub phase: Option<PhaseProgress>,
}

impl SessionSnapshot {
    /// Creates a snapshot confirming that no session is active.
    pub fn empty(timestamp: LogicalTimestamp) -> Self {
        Self {
            timestamp,
            session: None,
            usage: None,
            phase: None,
        }
    }

    /// Creates a snapshot for an active session.
    pub fn with_session(timestamp: LogicalTimestamp, session: SessionInfo) -> Self {
        Self {
            timestamp,
            session: Some(session),
            usage: None,
            phase: None,
        }
    }

    /// Sets the usage.
    pub fn usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Sets the phase progress.
    pub fn phase(mut self, phase: PhaseProgress) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Checks structural rules that serde cannot express.
    pub fn validate(&self) -> ProtocolResult<()> {
        if let Some(ref session) = self.session {
            session.validate()?;
        }
        if let Some(ref phase) = self.phase {
            phase.validate()?;
        }
        Ok(())
    }

    /// Decodes and validates a JSON response body.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        let snapshot: SessionSnapshot = serde_json::from_slice(bytes)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Encodes the snapshot as JSON.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;

    #[test]
    fn no_session_is_valid() {
        let snapshot = SessionSnapshot::from_json(br#"{"timestamp":5,"session":null}"#).unwrap();
        assert_eq!(snapshot, SessionSnapshot::empty(5));
    }

    #[test]
    fn missing_session_means_none() {
        let snapshot = SessionSnapshot::from_json(br#"{"timestamp":5}"#).unwrap();
        assert!(snapshot.session.is_none());
    }

    #[test]
    fn full_snapshot() {
        let body = br#"{
            "timestamp": 120,
            "session": {"id": "s-4", "status": "paused", "startTime": 10, "durationMs": 5000},
            "usage": {"used": 40, "budget": 100},
            "phase": {"label": "deploy", "completed": 1, "total": 3}
        }"#;
        let snapshot = SessionSnapshot::from_json(body).unwrap();
        let session = snapshot.session.unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.duration_ms, 5000);
        assert_eq!(snapshot.usage.unwrap().remaining(), 60);
        assert_eq!(snapshot.phase.unwrap().total, 3);
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        assert!(SessionSnapshot::from_json(br#"{"session":null}"#).is_err());
    }

    #[test]
    fn invalid_phase_is_rejected() {
        let body = br#"{"timestamp":1,"phase":{"label":"x","completed":5,"total":1}}"#;
        assert!(matches!(
            SessionSnapshot::from_json(body),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn builder_encodes() {
        let snapshot = SessionSnapshot::with_session(9, SessionInfo::active("s-2", 100))
            .usage(ResourceUsage::new(1, 2));
        let bytes = snapshot.to_json().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"startTime\":100"));
    }
}
