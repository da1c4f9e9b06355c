use crate::config::SourceConfig;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// One hourly snapshot, identified by the UTC instant its hour starts at.
///
/// Only constructed through [`SnapshotWindow::containing`] and
/// [`SnapshotWindow::at`], so the start is always a whole UTC hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SnapshotWindow {
    start: DateTime<Utc>,
}

impl SnapshotWindow {
    /// The hour containing `instant`.
    pub fn containing(instant: DateTime<Utc>) -> Self {
        let into_hour = Duration::seconds(instant.timestamp().rem_euclid(3600))
            + Duration::nanoseconds(i64::from(instant.timestamp_subsec_nanos()));
        Self {
            start: instant - into_hour,
        }
    }

    /// The hour at the given UTC date, or `None` if the date or hour is invalid.
    pub fn at(year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .map(|start| Self { start })
    }

    /// The hour containing `now - lookback`.
    pub fn preceding(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self::containing(now - lookback)
    }

    /// Start of the window with minute and second zeroed.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }

    pub fn month(&self) -> u32 {
        self.start.month()
    }

    pub fn day(&self) -> u32 {
        self.start.day()
    }

    pub fn hour(&self) -> u32 {
        self.start.hour()
    }

    /// `pageviews-YYYYMMDD-HH0000.gz`
    pub fn file_name(&self) -> String {
        format!(
            "pageviews-{:04}{:02}{:02}-{:02}0000.gz",
            self.year(),
            self.month(),
            self.day(),
            self.hour()
        )
    }
}

impl fmt::Display for SnapshotWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:00Z",
            self.year(),
            self.month(),
            self.day(),
            self.hour()
        )
    }
}

/// Where a run's snapshot lives remotely and where it is staged locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotAddress {
    pub window: SnapshotWindow,
    pub url: String,
    pub staging_path: PathBuf,
}

impl SnapshotAddress {
    pub fn resolve(now: DateTime<Utc>, source: &SourceConfig) -> Self {
        let window = SnapshotWindow::preceding(now, source.lookback());
        Self::for_window(window, source)
    }

    pub fn for_window(window: SnapshotWindow, source: &SourceConfig) -> Self {
        let file_name = window.file_name();
        let url = format!(
            "{}/other/pageviews/{year}/{year}-{month:02}/{file_name}",
            source.base_url.trim_end_matches('/'),
            year = window.year(),
            month = window.month(),
        );
        let staging_path = source.data_dir.join(&file_name);
        Self {
            window,
            url,
            staging_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceConfig {
        SourceConfig {
            base_url: "https://dumps.wikimedia.org/".to_string(),
            data_dir: PathBuf::from("/opt/pageviews/data"),
            ..SourceConfig::default()
        }
    }

    #[test]
    fn test_resolve_zero_pads_components() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 7, 42, 13).unwrap();
        let address = SnapshotAddress::resolve(now, &source());

        assert_eq!(
            address.window,
            SnapshotWindow::at(2025, 3, 8, 7).unwrap()
        );
        assert_eq!(
            address.url,
            "https://dumps.wikimedia.org/other/pageviews/2025/2025-03/pageviews-20250308-070000.gz"
        );
        assert_eq!(
            address.staging_path,
            PathBuf::from("/opt/pageviews/data/pageviews-20250308-070000.gz")
        );
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2024, 11, 30, 23, 59, 59).unwrap();
        assert_eq!(
            SnapshotAddress::resolve(now, &source()),
            SnapshotAddress::resolve(now, &source())
        );
    }

    #[test]
    fn test_lookback_crosses_year_boundary() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 5, 0).unwrap();
        let address = SnapshotAddress::resolve(now, &source());
        assert_eq!(
            address.window,
            SnapshotWindow::at(2024, 12, 31, 0).unwrap()
        );
        assert!(address.url.contains("/2024/2024-12/pageviews-20241231-000000.gz"));
    }

    #[test]
    fn test_one_hour_lookback() {
        let src = SourceConfig {
            lookback_hours: 1,
            ..source()
        };
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 30, 0).unwrap();
        let address = SnapshotAddress::resolve(now, &src);
        assert_eq!(
            address.window,
            SnapshotWindow::at(2025, 5, 31, 23).unwrap()
        );
    }

    #[test]
    fn test_window_start_zeroes_minutes_and_seconds() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 7, 42, 13).unwrap();
        let window = SnapshotWindow::containing(now);
        assert_eq!(
            window.start(),
            Utc.with_ymd_and_hms(2025, 3, 9, 7, 0, 0).unwrap()
        );
        assert_eq!(window.to_string(), "2025-03-09T07:00Z");
    }

    #[test]
    fn test_invalid_calendar_hour_is_rejected() {
        assert_eq!(SnapshotWindow::at(2025, 13, 1, 0), None);
        assert_eq!(SnapshotWindow::at(2025, 2, 29, 0), None);
        assert_eq!(SnapshotWindow::at(2025, 3, 8, 24), None);
    }

    #[test]
    fn test_window_before_epoch_truncates_down() {
        let now = Utc.with_ymd_and_hms(1969, 12, 31, 23, 30, 15).unwrap();
        assert_eq!(
            SnapshotWindow::containing(now),
            SnapshotWindow::at(1969, 12, 31, 23).unwrap()
        );
    }
}
