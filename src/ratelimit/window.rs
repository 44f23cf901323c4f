//! Fixed time windows and their bucket labels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time window for rate limiting.
///
/// Windows are aligned to the UTC calendar: an hour window always starts at
/// minute zero, a day window at midnight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    #[default]
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }

    /// Format string producing a label that changes exactly once per window.
    fn label_format(&self) -> &'static str {
        match self {
            TimeWindow::Second => "%Y-%m-%d-%H-%M-%S",
            TimeWindow::Minute => "%Y-%m-%d-%H-%M",
            TimeWindow::Hour => "%Y-%m-%d-%H",
            TimeWindow::Day => "%Y-%m-%d",
        }
    }

    /// Label of the bucket containing `at`, e.g. `2024-03-01-13` for an hour window.
    pub fn bucket_label(&self, at: DateTime<Utc>) -> String {
        at.format(self.label_format()).to_string()
    }

    /// Time left until the bucket containing `at` rolls over.
    ///
    /// Rounded to whole seconds; at an exact boundary this is the full window.
    pub fn until_rollover(&self, at: DateTime<Utc>) -> Duration {
        let window_secs = self.duration().as_secs() as i64;
        let elapsed = at.timestamp().rem_euclid(window_secs);
        Duration::from_secs((window_secs - elapsed) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_time_window_duration() {
        assert_eq!(TimeWindow::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeWindow::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeWindow::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeWindow::Day.duration(), Duration::from_secs(86400));
    }

    #[test]
    fn test_default_window_is_hour() {
        assert_eq!(TimeWindow::default(), TimeWindow::Hour);
    }

    #[test]
    fn test_hour_label_truncates_minutes_and_seconds() {
        assert_eq!(TimeWindow::Hour.bucket_label(at(13, 0, 0)), "2024-03-01-13");
        assert_eq!(TimeWindow::Hour.bucket_label(at(13, 59, 59)), "2024-03-01-13");
        assert_eq!(TimeWindow::Hour.bucket_label(at(14, 0, 0)), "2024-03-01-14");
    }

    #[test]
    fn test_labels_per_granularity() {
        let t = at(9, 5, 7);
        assert_eq!(TimeWindow::Second.bucket_label(t), "2024-03-01-09-05-07");
        assert_eq!(TimeWindow::Minute.bucket_label(t), "2024-03-01-09-05");
        assert_eq!(TimeWindow::Day.bucket_label(t), "2024-03-01");
    }

    #[test]
    fn test_until_rollover() {
        assert_eq!(
            TimeWindow::Hour.until_rollover(at(13, 59, 30)),
            Duration::from_secs(30)
        );
        assert_eq!(
            TimeWindow::Hour.until_rollover(at(13, 0, 0)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            TimeWindow::Minute.until_rollover(at(13, 0, 45)),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_window_from_yaml() {
        let window: TimeWindow = serde_yaml::from_str("minute").unwrap();
        assert_eq!(window, TimeWindow::Minute);
    }
}
