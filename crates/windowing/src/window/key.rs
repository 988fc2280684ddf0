//! Window alignment and key generation
//!
//! Pure functions of `(entity_key, event_time, window_minutes)`. Windows are
//! aligned to multiples of their size counted from 00:00 UTC of the event's
//! day, so a size that does not divide a day restarts at midnight.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};

use super::types::WindowBounds;

/// Prefix of placeholder windows created for silent intervals
pub const EMPTY_WINDOW_PREFIX: &str = "empty";

/// Start of the `window_minutes` window containing `event_time`
pub fn window_start(event_time: DateTime<Utc>, window_minutes: u32) -> DateTime<Utc> {
    let minutes_of_day = event_time.hour() * 60 + event_time.minute();
    let start_minutes = (minutes_of_day / window_minutes) * window_minutes;

    let midnight = event_time.date_naive().and_time(NaiveTime::MIN).and_utc();
    midnight + Duration::minutes(i64::from(start_minutes))
}

/// Bounds of the `window_minutes` window containing `event_time`
pub fn window_bounds(event_time: DateTime<Utc>, window_minutes: u32) -> WindowBounds {
    WindowBounds::of_minutes(window_start(event_time, window_minutes), window_minutes)
}

/// Key of the window containing `event_time` for an entity
///
/// Format: `{entity_key}_{yyyyMMddHHmm}_{n}min`
pub fn window_key(entity_key: &str, event_time: DateTime<Utc>, window_minutes: u32) -> String {
    format_key(entity_key, window_start(event_time, window_minutes), window_minutes)
}

/// Key of a placeholder window starting at `start`
pub fn empty_window_key(start: DateTime<Utc>, window_minutes: u32) -> String {
    format_key(EMPTY_WINDOW_PREFIX, start, window_minutes)
}

fn format_key(prefix: &str, start: DateTime<Utc>, window_minutes: u32) -> String {
    format!("{}_{}_{}min", prefix, start.format("%Y%m%d%H%M"), window_minutes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_window_start_alignment() {
        assert_eq!(window_start(at(10, 1, 0), 5), at(10, 0, 0));
        assert_eq!(window_start(at(10, 4, 59), 5), at(10, 0, 0));
        assert_eq!(window_start(at(10, 5, 0), 5), at(10, 5, 0));
        assert_eq!(window_start(at(10, 59, 0), 60), at(10, 0, 0));
        assert_eq!(window_start(at(23, 59, 59), 1), at(23, 59, 0));
    }

    #[test]
    fn test_window_start_property_over_a_day() {
        for window_minutes in [1u32, 5, 7, 10, 15, 60, 90, 1440] {
            let mut t = at(0, 0, 0);
            while t < at(23, 59, 0) {
                let start = window_start(t, window_minutes);
                let from_midnight = (start - at(0, 0, 0)).num_minutes();
                assert_eq!(from_midnight % i64::from(window_minutes), 0);
                assert!(start <= t);
                assert!(t < start + Duration::minutes(i64::from(window_minutes)));
                t += Duration::seconds(37 * 60 + 11);
            }
        }
    }

    #[test]
    fn test_window_start_restarts_at_midnight() {
        // 1440 % 7 != 0: the last window of the day starts at 23:55
        assert_eq!(window_start(at(23, 58, 0), 7), at(23, 55, 0));
        let next_day = Utc.with_ymd_and_hms(2024, 3, 2, 0, 3, 0).unwrap();
        assert_eq!(
            window_start(next_day, 7),
            Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_window_key_format() {
        assert_eq!(window_key("42", at(10, 1, 0), 5), "42_202403011000_5min");
        assert_eq!(window_key("42", at(10, 4, 0), 5), "42_202403011000_5min");
        assert_eq!(window_key("42", at(10, 4, 0), 60), "42_202403011000_60min");
        assert_eq!(empty_window_key(at(10, 5, 0), 5), "empty_202403011005_5min");
    }

    #[test]
    fn test_window_bounds_end_is_start_plus_size() {
        let bounds = window_bounds(at(10, 17, 0), 15);
        assert_eq!(bounds.start, at(10, 15, 0));
        assert_eq!(bounds.end, at(10, 30, 0));
    }
}
