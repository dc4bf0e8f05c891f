//! Pure interval-policy functions.
//!
//! All elapsed-time math is a **calendar-date difference** in the configured
//! timezone, not a duration in seconds: two timestamps on the same local day
//! are 0 days apart regardless of time-of-day, and boundaries cross at local
//! midnight.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Whole calendar days between `created_at` and `now` in `tz`.
pub fn elapsed_days(created_at: DateTime<Utc>, now: DateTime<Utc>, tz: Tz) -> i64 {
    let created = created_at.with_timezone(&tz).date_naive();
    let today = now.with_timezone(&tz).date_naive();
    (today - created).num_days()
}

/// Whether a word registered at `created_at` is due at `now`.
///
/// Due-ness is an **exact match** on one of the configured day offsets: a
/// word whose elapsed days overshoot every entry without landing on one is
/// never due again. (`stage` deliberately uses `>=` instead — the two are
/// separate on purpose and must not be unified.)
pub fn is_due(created_at: DateTime<Utc>, now: DateTime<Utc>, tz: Tz, intervals: &[u32]) -> bool {
    let days = elapsed_days(created_at, now, tz);
    u32::try_from(days).is_ok_and(|days| intervals.contains(&days))
}

/// Progress stage of a word: the largest `i` such that
/// `elapsed_days >= intervals[i-1]`, 0 for a new word, `intervals.len()`
/// once the final interval has passed. Reporting only.
pub fn stage(created_at: DateTime<Utc>, now: DateTime<Utc>, tz: Tz, intervals: &[u32]) -> usize {
    let days = elapsed_days(created_at, now, tz);
    let Ok(days) = u32::try_from(days) else {
        return 0;
    };
    intervals.iter().filter(|&&offset| days >= offset).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    const TOKYO: Tz = chrono_tz::Asia::Tokyo;
    const INTERVALS: &[u32] = &[1, 4, 10];

    fn tokyo(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        TOKYO
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn same_local_day_is_zero_regardless_of_time() {
        let created = tokyo(2026, 8, 1, 23);
        let now = tokyo(2026, 8, 1, 0);
        assert_eq!(elapsed_days(created, now, TOKYO), 0);
    }

    #[test]
    fn day_boundary_crosses_at_local_midnight() {
        // 23:30 and 00:30 the next local day are one calendar day apart even
        // though only an hour of wall time passed.
        let created = TOKYO
            .with_ymd_and_hms(2026, 8, 1, 23, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        let now = TOKYO
            .with_ymd_and_hms(2026, 8, 2, 0, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(elapsed_days(created, now, TOKYO), 1);
    }

    #[test]
    fn due_exactly_on_configured_offsets() {
        let created = tokyo(2026, 8, 1, 12);
        for (day, expected) in [(0, false), (1, true), (2, false), (3, false), (4, true)] {
            let now = tokyo(2026, 8, 1 + day, 9);
            assert_eq!(
                is_due(created, now, TOKYO, INTERVALS),
                expected,
                "day {day}"
            );
        }
    }

    #[test]
    fn never_due_after_overshooting_every_interval() {
        let created = tokyo(2026, 1, 1, 12);
        let now = tokyo(2026, 1, 12, 12); // day 11, past the final 10
        assert!(!is_due(created, now, TOKYO, INTERVALS));
    }

    #[test]
    fn not_due_before_creation() {
        let created = tokyo(2026, 8, 10, 12);
        let now = tokyo(2026, 8, 9, 12);
        assert!(!is_due(created, now, TOKYO, INTERVALS));
    }

    #[test]
    fn stage_uses_at_least_semantics() {
        let created = tokyo(2026, 8, 1, 12);
        for (day, expected) in [(0u32, 0usize), (1, 1), (2, 1), (4, 2), (9, 2), (10, 3), (40, 3)] {
            let now = tokyo(2026, 8, 1, 12) + chrono::Duration::days(i64::from(day));
            assert_eq!(stage(created, now, TOKYO, INTERVALS), expected, "day {day}");
        }
    }

    #[test]
    fn stage_is_zero_before_creation() {
        let created = tokyo(2026, 8, 10, 12);
        let now = tokyo(2026, 8, 9, 12);
        assert_eq!(stage(created, now, TOKYO, INTERVALS), 0);
    }
}
