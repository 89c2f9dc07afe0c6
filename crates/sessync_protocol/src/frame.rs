//! Push channel frames.

use crate::error::{ProtocolError, ProtocolResult};
use crate::session::{PhaseProgress, ResourceUsage, SessionInfo, SessionStatus};
use crate::LogicalTimestamp;
use serde::{Deserialize, Serialize};

/// A frame received on the push channel.
///
/// Frames are internally tagged by `"type"` and every variant carries the
/// provider's logical timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PushFrame {
    /// Session identity changed. `session: None` confirms there is no active session.
    Session {
        /// Logical timestamp.
        timestamp: LogicalTimestamp,
        /// The session, if one is active.
        #[serde(default)]
        session: Option<SessionInfo>,
    },
    /// Elapsed time and stage progress.
    Metrics {
        /// Logical timestamp.
        timestamp: LogicalTimestamp,
        /// Accumulated session duration in milliseconds.
        duration_ms: u64,
        /// Stage progress, if reported.
        #[serde(default)]
        phase: Option<PhaseProgress>,
    },
    /// Resource usage against budget.
    Budget {
        /// Logical timestamp.
        timestamp: LogicalTimestamp,
        /// Current usage.
        usage: ResourceUsage,
    },
    /// Session status transition.
    Status {
        /// Logical timestamp.
        timestamp: LogicalTimestamp,
        /// New status.
        status: SessionStatus,
    },
    /// Liveness signal with no payload.
    Heartbeat {
        /// Logical timestamp.
        timestamp: LogicalTimestamp,
    },
}

impl PushFrame {
    /// Returns the frame's logical timestamp.
    pub fn timestamp(&self) -> LogicalTimestamp {
        match self {
            PushFrame::Session { timestamp, .. }
            | PushFrame::Metrics { timestamp, .. }
            | PushFrame::Budget { timestamp, .. }
            | PushFrame::Status { timestamp, .. }
            | PushFrame::Heartbeat { timestamp } => *timestamp,
        }
    }

    /// Returns the wire name of the frame type.
    pub fn kind(&self) -> &'static str {
        match self {
            PushFrame::Session { .. } => "session",
            PushFrame::Metrics { .. } => "metrics",
            PushFrame::Budget { .. } => "budget",
            PushFrame::Status { .. } => "status",
            PushFrame::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Returns true for heartbeat frames.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, PushFrame::Heartbeat { .. })
    }

    /// Checks structural rules that serde cannot express.
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            PushFrame::Session {
                session: Some(info),
                ..
            } => info.validate(),
            PushFrame::Metrics {
                phase: Some(phase), ..
            } => phase.validate(),
            _ => Ok(()),
        }
    }

    /// Encodes the frame as a JSON text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encoding(e.to_string()))
    }

    /// Encodes the frame as a CBOR binary frame.
    pub fn to_cbor(&self) -> ProtocolResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| ProtocolError::Encoding(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes and validates a JSON text frame.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        let frame: PushFrame = serde_json::from_str(text)?;
        frame.validate()?;
        Ok(frame)
    }

    /// Decodes and validates a CBOR binary frame.
    pub fn from_cbor(bytes: &[u8]) -> ProtocolResult<Self> {
        let frame: PushFrame =
            ciborium::from_reader(bytes).map_err(|e| ProtocolError::Cbor(e.to_string()))?;
        frame.validate()?;
        Ok(frame)
    }
}

/// An undecoded message as delivered by the push transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    /// UTF-8 text message carrying JSON.
    Text(String),
    /// Binary message carrying CBOR.
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Size of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            RawFrame::Text(text) => text.len(),
            RawFrame::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decodes a raw transport message into a typed frame.
pub fn decode_frame(raw: &RawFrame) -> ProtocolResult<PushFrame> {
    match raw {
        RawFrame::Text(text) => PushFrame::from_json(text),
        RawFrame::Binary(bytes) => PushFrame::from_cbor(bytes),
    }
}
