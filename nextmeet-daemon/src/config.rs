//! Daemon configuration.
//!
//! Everything the daemon needs is built once in `main` from CLI arguments
//! and passed down explicitly; no module-level globals.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveTime;
use clap::ValueEnum;

/// Desktop notification urgency, escalatable to `Critical` near start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UrgencyLevel {
    Low,
    Normal,
    Critical,
}

/// Notification behavior of the poll loop.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    /// Primary lead time in minutes before a meeting starts.
    pub lead_time_mins: i64,
    /// Additional lead-time offsets, each firing at most once per meeting.
    pub extra_offsets: Vec<i64>,
    pub icon: Option<String>,
    /// Notification expiry in milliseconds; 0 keeps the server default.
    pub expiry_ms: u32,
    pub urgency: UrgencyLevel,
    /// Escalate urgency to critical within this many minutes of start.
    pub critical_within_mins: Option<i64>,
    /// Wall-clock time for the daily agenda notification.
    pub morning_agenda: Option<NaiveTime>,
}

impl NotifyConfig {
    /// All lead-time marks, primary plus extras, deduplicated.
    pub fn lead_times(&self) -> Vec<i64> {
        let mut marks: Vec<i64> = std::iter::once(self.lead_time_mins)
            .chain(self.extra_offsets.iter().copied())
            .collect();
        marks.sort_unstable();
        marks.dedup();
        marks
    }
}

/// CalDAV backend settings. Present means CalDAV replaces the calendar CLI.
#[derive(Debug, Clone)]
pub struct CaldavConfig {
    /// Full URL of the calendar collection.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Hours before now included in the query window.
    pub lookbehind_hours: i64,
    /// Hours after now included in the query window.
    pub lookahead_hours: i64,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    /// Directory for the notified-ids ring file and the snooze marker.
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    /// Calendar hint passed through to the calendar CLI.
    pub calendar: Option<String>,
    /// When set, meetings come from this CalDAV collection instead of the
    /// calendar CLI.
    pub caldav: Option<CaldavConfig>,
    pub notify: NotifyConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_times_merge_and_dedup() {
        let config = NotifyConfig {
            enabled: true,
            lead_time_mins: 5,
            extra_offsets: vec![10, 2, 5],
            icon: None,
            expiry_ms: 0,
            urgency: UrgencyLevel::Normal,
            critical_within_mins: None,
            morning_agenda: None,
        };
        assert_eq!(config.lead_times(), vec![2, 5, 10]);
    }
}
