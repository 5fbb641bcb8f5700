//! The meeting value object.
//!
//! Meetings are rebuilt wholesale from the calendar source on every poll
//! cycle and never mutated in place. The only identity that survives a poll
//! is the dedup key derived from title + start + end, used for notification
//! bookkeeping.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Duration at or above which a meeting counts as all-day.
const ALL_DAY_HOURS: i64 = 24;

/// A single calendar meeting occurrence.
///
/// Times are naive local wall-clock times: the agenda source emits local
/// times without zone information, and everything downstream (filters,
/// lead-time marks, status bars) reasons in local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meeting {
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub calendar_url: String,
    #[serde(default)]
    pub meet_url: Option<String>,
    #[serde(default)]
    pub calendar_name: Option<String>,
}

impl Meeting {
    /// Whether this meeting spans a full day or more.
    pub fn is_all_day(&self) -> bool {
        self.end - self.start >= TimeDelta::hours(ALL_DAY_HOURS)
    }

    /// Whether the meeting is in progress at `now`.
    pub fn is_ongoing_at(&self, now: NaiveDateTime) -> bool {
        self.start <= now && now <= self.end
    }

    /// Whole minutes until the meeting starts, floored. Negative from the
    /// first second after the start, so lead-time marks (including 0) never
    /// match a meeting that has already begun.
    pub fn minutes_until(&self, now: NaiveDateTime) -> i64 {
        (self.start - now).num_seconds().div_euclid(60)
    }

    /// Stable identity for notification dedup and next-meeting diffing.
    pub fn dedup_key(&self) -> String {
        format!("{}|{}|{}", self.title, self.start, self.end)
    }

    /// Wire representation: the stored fields plus the derived flags,
    /// computed against `now` so clients never re-derive them.
    pub fn to_wire(&self, now: NaiveDateTime) -> serde_json::Value {
        serde_json::json!({
            "title": self.title,
            "start": self.start,
            "end": self.end,
            "calendar_url": self.calendar_url,
            "meet_url": self.meet_url,
            "calendar_name": self.calendar_name,
            "is_all_day": self.is_all_day(),
            "is_ongoing": self.is_ongoing_at(now),
        })
    }
}
