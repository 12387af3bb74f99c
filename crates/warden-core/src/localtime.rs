//! Local-time interpretation for rollover, bedtime, and schedule math.
//!
//! The control plane interprets agents' "local" time through a single
//! configured fixed offset (`Settings::tz_offset_minutes`). Daylight-saving
//! transitions do not slide already-armed deadlines; the next evaluation
//! simply uses the new wall-clock reading.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use warden_types::DayOfWeek;

/// The local calendar date of a UTC instant under the configured offset.
pub fn local_date(at: DateTime<Utc>, tz_offset_minutes: i32) -> NaiveDate {
    (at + Duration::minutes(i64::from(tz_offset_minutes))).date_naive()
}

/// The local time-of-day of a UTC instant.
pub fn local_time(at: DateTime<Utc>, tz_offset_minutes: i32) -> NaiveTime {
    (at + Duration::minutes(i64::from(tz_offset_minutes))).time()
}

/// The local day-of-week of a UTC instant.
pub fn local_day(at: DateTime<Utc>, tz_offset_minutes: i32) -> DayOfWeek {
    use chrono::Datelike;
    (at + Duration::minutes(i64::from(tz_offset_minutes)))
        .weekday()
        .into()
}

/// Seconds from `at` until `target` on the same local day. Negative once
/// the target has passed.
pub fn seconds_until(at: DateTime<Utc>, target: NaiveTime, tz_offset_minutes: i32) -> i64 {
    let now_local = local_time(at, tz_offset_minutes);
    target.signed_duration_since(now_local).num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn offset_shifts_date_boundary() {
        // 23:30 UTC on the 6th is already the 7th at +60 minutes.
        let instant = at("2026-03-06T23:30:00Z");
        assert_eq!(local_date(instant, 0).to_string(), "2026-03-06");
        assert_eq!(local_date(instant, 60).to_string(), "2026-03-07");
        assert_eq!(local_date(instant, -60).to_string(), "2026-03-06");
    }

    #[test]
    fn weekday_follows_offset() {
        // Friday 23:30 UTC is Saturday at +60.
        let instant = at("2026-03-06T23:30:00Z");
        assert_eq!(local_day(instant, 0), DayOfWeek::Fri);
        assert_eq!(local_day(instant, 60), DayOfWeek::Sat);
    }

    #[test]
    fn seconds_until_bedtime() {
        let bedtime = NaiveTime::from_hms_opt(21, 0, 0).unwrap();
        assert_eq!(seconds_until(at("2026-03-06T20:45:00Z"), bedtime, 0), 900);
        assert_eq!(seconds_until(at("2026-03-06T20:59:30Z"), bedtime, 0), 30);
        assert_eq!(seconds_until(at("2026-03-06T21:00:00Z"), bedtime, 0), 0);
        assert_eq!(seconds_until(at("2026-03-06T21:10:00Z"), bedtime, 0), -600);
        // 20:45 UTC is 21:45 local at +60: bedtime already passed.
        assert_eq!(seconds_until(at("2026-03-06T20:45:00Z"), bedtime, 60), -2700);
    }
}
