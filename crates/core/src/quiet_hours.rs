//! Quiet-hours arithmetic.
//!
//! [`is_within_quiet_hours`] is pure wall-clock math on time-of-day values;
//! timezone conversion happens separately in [`local_time_of_day`].

use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Whether `now` falls inside the half-open window `[start, end)`.
///
/// When `start > end` the window crosses midnight (e.g. 22:00 to 07:00).
/// An empty window (`start == end`) never matches.
pub fn is_within_quiet_hours(start: NaiveTime, end: NaiveTime, now: NaiveTime) -> bool {
    if start <= end {
        start <= now && now < end
    } else {
        now >= start || now < end
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, CoreError> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::Validation(format!("'{name}' is not a valid IANA timezone")))
}

/// Convert a UTC instant to the wall-clock time of day in `timezone`.
///
/// An unknown timezone falls back to UTC.
pub fn local_time_of_day(now: Timestamp, timezone: &str) -> NaiveTime {
    let tz = parse_timezone(timezone).unwrap_or(chrono_tz::UTC);
    now.with_timezone(&tz).time()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn overnight_window_covers_late_evening() {
        assert!(is_within_quiet_hours(t(22, 0), t(7, 0), t(23, 30)));
    }

    #[test]
    fn overnight_window_covers_early_morning() {
        assert!(is_within_quiet_hours(t(22, 0), t(7, 0), t(6, 59)));
    }

    #[test]
    fn overnight_window_end_is_exclusive() {
        assert!(!is_within_quiet_hours(t(22, 0), t(7, 0), t(7, 0)));
    }

    #[test]
    fn overnight_window_start_is_inclusive() {
        assert!(is_within_quiet_hours(t(22, 0), t(7, 0), t(22, 0)));
        assert!(!is_within_quiet_hours(t(22, 0), t(7, 0), t(21, 59)));
    }

    #[test]
    fn same_day_window() {
        assert!(is_within_quiet_hours(t(1, 0), t(6, 0), t(3, 0)));
        assert!(!is_within_quiet_hours(t(1, 0), t(6, 0), t(6, 0)));
        assert!(!is_within_quiet_hours(t(1, 0), t(6, 0), t(12, 0)));
    }

    #[test]
    fn empty_window_never_matches() {
        assert!(!is_within_quiet_hours(t(9, 0), t(9, 0), t(9, 0)));
    }

    #[test]
    fn converts_to_local_wall_clock() {
        // 2026-01-15 04:30 UTC is 23:30 the previous evening in New York (EST).
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 4, 30, 0).unwrap();
        assert_eq!(local_time_of_day(now, "America/New_York"), t(23, 30));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 4, 30, 0).unwrap();
        assert_eq!(local_time_of_day(now, "Mars/Olympus_Mons"), t(4, 30));
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }
}
