//! Time-to-live bookkeeping for cached values.
//!
//! Staleness is a pure function of the capture time, the allowed age, and an
//! explicit `now`, so callers can test cache behaviour without a wall clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimedEntry<T> {
    pub value: T,
    pub captured_at: DateTime<Utc>,
}

impl<T> TimedEntry<T> {
    pub fn new(value: T, captured_at: DateTime<Utc>) -> Self {
        Self { value, captured_at }
    }

    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        is_stale(self.captured_at, max_age, now)
    }

    pub fn fresh_value(&self, max_age: Duration, now: DateTime<Utc>) -> Option<&T> {
        (!self.is_stale(max_age, now)).then_some(&self.value)
    }
}

/// An entry is stale once its age strictly exceeds `max_age`. Entries captured in
/// the future (clock skew) are treated as fresh.
pub fn is_stale(captured_at: DateTime<Utc>, max_age: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(captured_at) > max_age
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{is_stale, TimedEntry};

    #[test]
    fn entry_is_fresh_until_age_exceeds_bound() {
        let captured = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().expect("valid time");
        let max_age = Duration::minutes(5);

        assert!(!is_stale(captured, max_age, captured));
        assert!(!is_stale(captured, max_age, captured + Duration::minutes(5)));
        assert!(is_stale(captured, max_age, captured + Duration::minutes(5) + Duration::seconds(1)));
        assert!(!is_stale(captured, max_age, captured - Duration::minutes(1)));
    }

    #[test]
    fn fresh_value_hides_stale_entries() {
        let captured = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().expect("valid time");
        let entry = TimedEntry::new("snapshot", captured);

        assert_eq!(entry.fresh_value(Duration::minutes(5), captured), Some(&"snapshot"));
        assert_eq!(entry.fresh_value(Duration::minutes(5), captured + Duration::hours(1)), None);
    }
}
