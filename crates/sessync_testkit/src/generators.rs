//! Property-based test generators using proptest.
//!
//! Provides strategies for protocol values and for interleavings of push
//! and poll updates.

use proptest::prelude::*;
use sessync_protocol::{
    LogicalTimestamp, PhaseProgress, PushFrame, ResourceUsage, SessionInfo, SessionSnapshot,
    SessionStatus,
};

/// Strategy for session statuses.
pub fn status_strategy() -> impl Strategy<Value = SessionStatus> {
    prop_oneof![
        Just(SessionStatus::Active),
        Just(SessionStatus::Paused),
        Just(SessionStatus::Completed),
    ]
}

/// Strategy for valid sessions.
pub fn session_strategy() -> impl Strategy<Value = SessionInfo> {
    (
        "[a-z][a-z0-9-]{0,11}",
        status_strategy(),
        proptest::option::of(0u64..4_000_000_000_000),
        0u64..86_400_000,
    )
        .prop_map(|(id, status, start_time, duration_ms)| SessionInfo {
            id,
            status,
            start_time,
            duration_ms,
        })
}

/// Strategy for resource usage.
pub fn usage_strategy() -> impl Strategy<Value = ResourceUsage> {
    (0u64..1_000_000, 1u64..1_000_000, proptest::option::of(0u64..2_000_000)).prop_map(
        |(used, budget, projected)| ResourceUsage {
            used,
            budget,
            projected,
        },
    )
}

/// Strategy for valid phase progress (`completed <= total`).
pub fn phase_strategy() -> impl Strategy<Value = PhaseProgress> {
    ("[a-z]{1,8}", 0u32..20)
        .prop_flat_map(|(label, total)| (Just(label), 0..=total, Just(total)))
        .prop_map(|(label, completed, total)| PhaseProgress::new(label, completed, total))
}

/// Strategy for data frames (no heartbeats) at `timestamp`.
pub fn data_frame_strategy(
    timestamp: impl Strategy<Value = LogicalTimestamp>,
) -> impl Strategy<Value = PushFrame> {
    (timestamp, 0u8..4).prop_flat_map(|(timestamp, kind)| match kind {
        0 => proptest::option::of(session_strategy())
            .prop_map(move |session| PushFrame::Session { timestamp, session })
            .boxed(),
        1 => (0u64..86_400_000, proptest::option::of(phase_strategy()))
            .prop_map(move |(duration_ms, phase)| PushFrame::Metrics {
                timestamp,
                duration_ms,
                phase,
            })
            .boxed(),
        2 => usage_strategy()
            .prop_map(move |usage| PushFrame::Budget { timestamp, usage })
            .boxed(),
        _ => status_strategy()
            .prop_map(move |status| PushFrame::Status { timestamp, status })
            .boxed(),
    })
}

/// Strategy for any frame, heartbeats included.
pub fn frame_strategy() -> impl Strategy<Value = PushFrame> {
    prop_oneof![
        4 => data_frame_strategy(0u64..1_000),
        1 => (0u64..1_000).prop_map(|timestamp| PushFrame::Heartbeat { timestamp }),
    ]
}

/// Strategy for valid snapshots at `timestamp`.
pub fn snapshot_strategy(
    timestamp: impl Strategy<Value = LogicalTimestamp>,
) -> impl Strategy<Value = SessionSnapshot> {
    (
        timestamp,
        proptest::option::of(session_strategy()),
        proptest::option::of(usage_strategy()),
        proptest::option::of(phase_strategy()),
    )
        .prop_map(|(timestamp, session, usage, phase)| SessionSnapshot {
            timestamp,
            session,
            usage,
            phase,
        })
}

/// One update offered to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// A push frame.
    Push(PushFrame),
    /// A poll result.
    Poll(SessionSnapshot),
}

impl Update {
    /// Logical timestamp of the update.
    pub fn timestamp(&self) -> LogicalTimestamp {
        match self {
            Update::Push(frame) => frame.timestamp(),
            Update::Poll(snapshot) => snapshot.timestamp,
        }
    }
}

/// Strategy for an interleaving of push and poll updates with timestamps
/// drawn from a small range, so reordering and duplicates are common.
pub fn update_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<Update>> {
    let update = prop_oneof![
        data_frame_strategy(0u64..50).prop_map(Update::Push),
        snapshot_strategy(0u64..50).prop_map(Update::Poll),
    ];
    prop::collection::vec(update, 1..max_len.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_frames_are_valid(frame in frame_strategy()) {
            prop_assert!(frame.validate().is_ok());
        }

        #[test]
        fn generated_snapshots_are_valid(snapshot in snapshot_strategy(0u64..10)) {
            prop_assert!(snapshot.validate().is_ok());
            prop_assert!(snapshot.timestamp < 10);
        }

        #[test]
        fn sequences_are_bounded(updates in update_sequence_strategy(16)) {
            prop_assert!(!updates.is_empty());
            prop_assert!(updates.len() < 16);
            prop_assert!(updates.iter().all(|u| u.timestamp() < 50));
        }
    }
}
