//! Calendar-day keying.
//!
//! Daily usage counters and the attendance roster are keyed by the calendar
//! day an event belongs to *in the service's locale*, not in UTC. A scan at
//! 23:30 UTC on the 1st belongs to the 2nd for a service running at UTC+9.
//! The offset is carried in [`LedgerConfig`](crate::config::LedgerConfig)
//! and applied here, so every handler derives the same key for the same
//! instant.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A calendar-day key in `YYYY-MM-DD` form.
///
/// # Example
///
/// ```
/// use stampledger_core::day::DayKey;
/// use chrono::{TimeZone, Utc};
///
/// let at = Utc.with_ymd_and_hms(2025, 6, 30, 23, 30, 0).unwrap();
/// assert_eq!(DayKey::from_datetime(at, 0).as_str(), "2025-06-30");
/// assert_eq!(DayKey::from_datetime(at, 9).as_str(), "2025-07-01");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DayKey(String);

impl DayKey {
    /// Derives the day key for an instant, shifted by the given UTC offset
    /// in hours.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>, utc_offset_hours: i32) -> Self {
        let shifted = at + Duration::hours(i64::from(utc_offset_hours));
        Self(shifted.format("%Y-%m-%d").to_string())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    #[allow(clippy::unwrap_used)] // Hardcoded valid timestamps
    fn utc_midnight_boundary() {
        let just_before = Utc.with_ymd_and_hms(2025, 3, 31, 23, 59, 59).unwrap();
        let just_after = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();

        assert_eq!(DayKey::from_datetime(just_before, 0).as_str(), "2025-03-31");
        assert_eq!(DayKey::from_datetime(just_after, 0).as_str(), "2025-04-01");
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Hardcoded valid timestamp
    fn positive_offset_rolls_day_forward() {
        let at = Utc.with_ymd_and_hms(2025, 12, 31, 20, 0, 0).unwrap();
        assert_eq!(DayKey::from_datetime(at, 9).as_str(), "2026-01-01");
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Hardcoded valid timestamp
    fn negative_offset_rolls_day_back() {
        let at = Utc.with_ymd_and_hms(2025, 7, 1, 3, 0, 0).unwrap();
        assert_eq!(DayKey::from_datetime(at, -5).as_str(), "2025-06-30");
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Hardcoded valid timestamp
    fn same_instant_same_key() {
        let at = Utc.with_ymd_and_hms(2025, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(
            DayKey::from_datetime(at, 9),
            DayKey::from_datetime(at, 9)
        );
    }
}
