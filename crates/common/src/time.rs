//! Session-timezone clock helpers: minute-bucketing and the force-exit cutoff.

use chrono::{NaiveTime, TimeZone};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;

/// Wraps the session timezone (India Standard Time for NIFTY weeklies) so
/// every minute-boundary and cutoff-time comparison goes through one place.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    tz: Tz,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self { tz: Kolkata }
    }
}

impl SessionClock {
    #[must_use]
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// The minute index (minutes since epoch, in session-local wall clock)
    /// that `ts_ms` falls into. Two ticks in the same local minute return
    /// the same index regardless of UTC offset handling.
    #[must_use]
    pub fn minute_index(&self, ts_ms: i64) -> i64 {
        let utc = chrono::Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_default();
        let local = utc.with_timezone(&self.tz);
        local.timestamp() / 60
    }

    /// True if `ts_ms`, interpreted in the session timezone, is at or past
    /// `cutoff`.
    #[must_use]
    pub fn is_past(&self, ts_ms: i64, cutoff: NaiveTime) -> bool {
        let utc = chrono::Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_default();
        let local = utc.with_timezone(&self.tz);
        local.time() >= cutoff
    }

    /// The session-local wall-clock time for `ts_ms`.
    #[must_use]
    pub fn local_time(&self, ts_ms: i64) -> NaiveTime {
        let utc = chrono::Utc.timestamp_millis_opt(ts_ms).single().unwrap_or_default();
        utc.with_timezone(&self.tz).time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_local_minute_shares_an_index() {
        let clock = SessionClock::default();
        // 09:15:05 and 09:15:55 IST on the same day fall in the same minute.
        let base = chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(2026, 2, 6, 9, 15, 5)
            .unwrap()
            .timestamp_millis();
        let later = base + 50_000;
        assert_eq!(clock.minute_index(base), clock.minute_index(later));
    }

    #[test]
    fn minute_rolls_over_at_boundary() {
        let clock = SessionClock::default();
        let base = chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(2026, 2, 6, 9, 15, 59)
            .unwrap()
            .timestamp_millis();
        let next = base + 1_500;
        assert_ne!(clock.minute_index(base), clock.minute_index(next));
    }

    #[test]
    fn cutoff_detection() {
        let clock = SessionClock::default();
        let cutoff = NaiveTime::from_hms_opt(15, 15, 0).unwrap();
        let before = chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(2026, 2, 6, 15, 14, 59)
            .unwrap()
            .timestamp_millis();
        let after = chrono_tz::Asia::Kolkata
            .with_ymd_and_hms(2026, 2, 6, 15, 15, 0)
            .unwrap()
            .timestamp_millis();
        assert!(!clock.is_past(before, cutoff));
        assert!(clock.is_past(after, cutoff));
    }
}
