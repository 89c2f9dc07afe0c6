//! The synchronized session state.

use crate::quality::ConnectionQuality;
use serde::Serialize;
use sessync_protocol::{LogicalTimestamp, PhaseProgress, ResourceUsage, SessionInfo, SessionStatus};

/// What the engine knows about the remote session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "session", rename_all = "lowercase")]
pub enum SessionView {
    /// Nothing confirmed yet.
    #[default]
    Unknown,
    /// The provider confirmed that no session is active.
    Absent,
    /// The provider reported this session.
    Present(SessionInfo),
}

impl SessionView {
    /// Returns the session if one is present.
    pub fn info(&self) -> Option<&SessionInfo> {
        match self {
            SessionView::Present(info) => Some(info),
            _ => None,
        }
    }

    /// Returns the session status if one is present.
    pub fn status(&self) -> Option<SessionStatus> {
        self.info().map(|info| info.status)
    }

    /// Returns true once the provider has answered either way.
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, SessionView::Unknown)
    }
}

impl From<Option<SessionInfo>> for SessionView {
    fn from(session: Option<SessionInfo>) -> Self {
        match session {
            Some(info) => SessionView::Present(info),
            None => SessionView::Absent,
        }
    }
}

/// Transport status of the push channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Not connected.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The channel is open.
    Connected,
    /// The channel failed; a `Disconnected` follows.
    Error,
}

impl ConnectionStatus {
    /// Returns the status as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }

    /// Next status on the way from `self` to `target`.
    ///
    /// Visible transitions follow
    /// `disconnected -> connecting -> connected -> error -> disconnected`,
    /// with `connecting -> error` for failed attempts.
    pub(crate) fn step_toward(self, target: ConnectionStatus) -> ConnectionStatus {
        use ConnectionStatus::*;
        match (self, target) {
            (Disconnected, _) => Connecting,
            (Connecting, Connected) => Connected,
            (Connecting, _) => Error,
            (Connected, _) => Error,
            (Error, _) => Disconnected,
        }
    }
}

/// Transport health as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    /// Push channel status.
    pub status: ConnectionStatus,
    /// Freshness label.
    pub quality: ConnectionQuality,
    /// Engine-clock milliseconds of the last committed update.
    pub last_update: Option<u64>,
    /// Highest logical timestamp committed so far.
    pub last_timestamp: Option<LogicalTimestamp>,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// The reconnection budget is spent; polling is the only source.
    pub gave_up: bool,
}

impl ConnectionInfo {
    /// Returns true if the push channel is open.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            quality: ConnectionQuality::Offline,
            last_update: None,
            last_timestamp: None,
            reconnect_attempts: 0,
            gave_up: false,
        }
    }
}

/// Flags describing the engine's own lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiFlags {
    /// `initialize` is in progress.
    pub loading: bool,
    /// Terminal error, if any.
    pub error: Option<String>,
    /// The initial snapshot has been applied.
    pub initialized: bool,
}

/// The single authoritative snapshot of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedState {
    /// Session identity and status.
    pub session: SessionView,
    /// Resource usage.
    pub resource_usage: ResourceUsage,
    /// Stage progress.
    pub phase: PhaseProgress,
    /// Transport health.
    pub connection: ConnectionInfo,
    /// Engine lifecycle flags.
    pub ui: UiFlags,
}

impl SyncedState {
    /// Returns true if the remote data (not transport or lifecycle flags) matches.
    pub fn same_content(&self, other: &SyncedState) -> bool {
        self.session == other.session
            && self.resource_usage == other.resource_usage
            && self.phase == other.phase
    }
}

/// Statistics about engine activity.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Frames decoded from the push channel, heartbeats included.
    pub frames_received: u64,
    /// Frames dropped because they could not be parsed.
    pub frames_dropped: u64,
    /// Updates committed to the state.
    pub commits: u64,
    /// Updates dropped as exact duplicates.
    pub duplicates: u64,
    /// Updates discarded for carrying an older logical timestamp.
    pub stale_discarded: u64,
    /// Snapshot fetches issued by the poll scheduler.
    pub polls_issued: u64,
    /// Poll ticks skipped because push data was fresh.
    pub polls_skipped: u64,
    /// Reconnect attempts scheduled.
    pub reconnect_attempts: u64,
    /// Last error message.
    pub last_error: Option<String>,
}
