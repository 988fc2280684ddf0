//! Window types and bounds
//!
//! This module defines the core window types shared by the finalization
//! engine and the query binder.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the time bounds of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowBounds {
    /// Start time of the window (inclusive)
    pub start: DateTime<Utc>,
    /// End time of the window (exclusive)
    pub end: DateTime<Utc>,
}

impl WindowBounds {
    /// Create a new window bounds
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    /// Bounds of a window of `minutes` starting at `start`
    pub fn of_minutes(start: DateTime<Utc>, minutes: u32) -> Self {
        Self::new(start, start + Duration::minutes(i64::from(minutes)))
    }

    /// Get the duration of the window
    pub fn duration(&self) -> Duration {
        self.end.signed_duration_since(self.start)
    }

    /// Check if a timestamp falls within this window
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Check if these bounds lie entirely inside `[from, to]`
    pub fn within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.start >= from && self.end <= to
    }
}

impl fmt::Display for WindowBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} - {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

impl PartialOrd for WindowBounds {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WindowBounds {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }
}

/// Window type used in generated streaming queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Fixed-size, non-overlapping windows
    #[default]
    Tumbling,
    /// Fixed-size windows advancing by half their size
    Hopping,
    /// Gap-based windows
    Session,
}

impl fmt::Display for WindowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WindowType::Tumbling => "TUMBLING",
            WindowType::Hopping => "HOPPING",
            WindowType::Session => "SESSION",
        };
        f.write_str(name)
    }
}

/// Output mode of a windowed aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Emit every incremental update
    #[default]
    Changes,
    /// Emit once when the window closes
    Final,
}

impl OutputMode {
    /// Keyword used after `EMIT`
    pub fn keyword(&self) -> &'static str {
        match self {
            OutputMode::Changes => "CHANGES",
            OutputMode::Final => "FINAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_window_bounds_of_minutes() {
        let bounds = WindowBounds::of_minutes(ts(10, 0), 5);
        assert_eq!(bounds.end, ts(10, 5));
        assert_eq!(bounds.duration(), Duration::minutes(5));
    }

    #[test]
    #[should_panic(expected = "Window start must be before end")]
    fn test_window_bounds_invalid() {
        WindowBounds::new(ts(10, 5), ts(10, 0));
    }

    #[test]
    fn test_window_bounds_contains_is_half_open() {
        let bounds = WindowBounds::of_minutes(ts(10, 0), 5);
        assert!(bounds.contains(ts(10, 0)));
        assert!(bounds.contains(ts(10, 4)));
        assert!(!bounds.contains(ts(10, 5)));
    }

    #[test]
    fn test_window_bounds_within() {
        let bounds = WindowBounds::of_minutes(ts(10, 0), 5);
        assert!(bounds.within(ts(10, 0), ts(10, 5)));
        assert!(!bounds.within(ts(10, 1), ts(11, 0)));
        assert!(!bounds.within(ts(9, 0), ts(10, 4)));
    }

    #[test]
    fn test_window_ordering() {
        let a = WindowBounds::of_minutes(ts(10, 0), 5);
        let b = WindowBounds::of_minutes(ts(10, 0), 10);
        let c = WindowBounds::of_minutes(ts(10, 5), 5);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_window_type_and_mode_keywords() {
        assert_eq!(WindowType::Hopping.to_string(), "HOPPING");
        assert_eq!(OutputMode::Final.keyword(), "FINAL");
        assert_eq!(OutputMode::default(), OutputMode::Changes);
    }
}
