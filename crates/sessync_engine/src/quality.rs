//! Connection quality estimation.

use serde::Serialize;
use std::time::Duration;

/// Updates younger than this are `Excellent`.
pub const EXCELLENT_WITHIN: Duration = Duration::from_secs(5);
/// Updates younger than this are `Good`.
pub const GOOD_WITHIN: Duration = Duration::from_secs(15);
/// Updates younger than this are `Poor`; anything older is `Offline`.
pub const POOR_WITHIN: Duration = Duration::from_secs(60);

/// Coarse health label derived from data freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// Data is fresh.
    Excellent,
    /// Data is slightly behind.
    Good,
    /// Data is noticeably stale.
    Poor,
    /// No recent data at all.
    Offline,
}

impl ConnectionQuality {
    /// Returns the label as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "excellent",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Poor => "poor",
            ConnectionQuality::Offline => "offline",
        }
    }
}

/// Derives the quality label from the age of the last committed update.
///
/// `now_ms` and `last_update_ms` are milliseconds on the engine clock.
/// No update yet means `Offline`; a stamp ahead of `now_ms` counts as zero age.
pub fn estimate(now_ms: u64, last_update_ms: Option<u64>) -> ConnectionQuality {
    let Some(last) = last_update_ms else {
        return ConnectionQuality::Offline;
    };
    let age = Duration::from_millis(now_ms.saturating_sub(last));

    if age < EXCELLENT_WITHIN {
        ConnectionQuality::Excellent
    } else if age < GOOD_WITHIN {
        ConnectionQuality::Good
    } else if age < POOR_WITHIN {
        ConnectionQuality::Poor
    } else {
        ConnectionQuality::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        let last = Some(1_000_000);
        assert_eq!(estimate(1_000_000, last), ConnectionQuality::Excellent);
        assert_eq!(estimate(1_004_999, last), ConnectionQuality::Excellent);
        assert_eq!(estimate(1_005_000, last), ConnectionQuality::Good);
        assert_eq!(estimate(1_014_999, last), ConnectionQuality::Good);
        assert_eq!(estimate(1_015_000, last), ConnectionQuality::Poor);
        assert_eq!(estimate(1_059_999, last), ConnectionQuality::Poor);
        assert_eq!(estimate(1_060_000, last), ConnectionQuality::Offline);
    }

    #[test]
    fn no_update_is_offline() {
        assert_eq!(estimate(5, None), ConnectionQuality::Offline);
    }

    #[test]
    fn future_update_is_excellent() {
        assert_eq!(estimate(10, Some(20)), ConnectionQuality::Excellent);
    }
}
