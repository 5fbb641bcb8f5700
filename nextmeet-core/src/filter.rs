//! Meeting filtering and next-meeting selection.
//!
//! All predicates are AND'd and applied in a fixed order; the first failing
//! predicate drops the meeting. Filters never mutate the cache, they narrow
//! a snapshot of it.

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::meeting::Meeting;

/// Filter fields shared by the `get_next` and `list` RPC methods.
///
/// This deserializes directly from the request params object: absent fields
/// mean "no filter" and unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Keep only meetings that have a meeting link.
    pub only_with_link: bool,
    /// Drop meetings starting more than this many minutes from now
    /// (ongoing meetings are exempt).
    pub within_mins: Option<i64>,
    /// Drop meetings not starting today (ongoing meetings are exempt).
    pub today_only: bool,
    /// Drop all-day meetings.
    pub skip_all_day_meeting: bool,
    /// Keep only titles containing any of these terms (case-insensitive).
    pub include_title: Vec<String>,
    /// Drop titles containing any of these terms (case-insensitive).
    pub exclude_title: Vec<String>,
    /// Keep only calendar URLs containing any of these substrings.
    pub include_calendar: Vec<String>,
    /// Drop calendar URLs containing any of these substrings.
    pub exclude_calendar: Vec<String>,
    /// "HH:MM-HH:MM" window the meeting's start time-of-day must fall in
    /// (ongoing meetings are exempt).
    pub work_hours: Option<String>,
}

fn parse_work_hours(spec: &str) -> Option<(NaiveTime, NaiveTime)> {
    let (begin, end) = spec.split_once('-')?;
    let begin = NaiveTime::parse_from_str(begin.trim(), "%H:%M").ok()?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").ok()?;
    Some((begin, end))
}

fn keeps(m: &Meeting, opts: &FilterOptions, now: NaiveDateTime) -> bool {
    let ongoing = m.is_ongoing_at(now);

    if opts.only_with_link && m.meet_url.is_none() {
        return false;
    }
    if let Some(mins) = opts.within_mins {
        if !ongoing && m.start - now > TimeDelta::minutes(mins) {
            return false;
        }
    }
    if opts.today_only && !ongoing && m.start.date() != now.date() {
        return false;
    }
    if opts.skip_all_day_meeting && m.is_all_day() {
        return false;
    }
    let title = m.title.to_lowercase();
    if !opts.include_title.is_empty()
        && !opts
            .include_title
            .iter()
            .any(|t| title.contains(&t.to_lowercase()))
    {
        return false;
    }
    if opts
        .exclude_title
        .iter()
        .any(|t| title.contains(&t.to_lowercase()))
    {
        return false;
    }
    if !opts.include_calendar.is_empty()
        && !opts
            .include_calendar
            .iter()
            .any(|c| m.calendar_url.contains(c.as_str()))
    {
        return false;
    }
    if opts
        .exclude_calendar
        .iter()
        .any(|c| m.calendar_url.contains(c.as_str()))
    {
        return false;
    }
    if let Some(spec) = opts.work_hours.as_deref() {
        // A malformed window is treated as no filter.
        if let Some((begin, end)) = parse_work_hours(spec) {
            let tod = m.start.time();
            if !ongoing && (tod < begin || tod > end) {
                return false;
            }
        }
    }
    true
}

/// Apply all filters and return the survivors sorted ascending by start.
pub fn apply_filters(
    meetings: &[Meeting],
    opts: &FilterOptions,
    now: NaiveDateTime,
) -> Vec<Meeting> {
    let mut out: Vec<Meeting> = meetings
        .iter()
        .filter(|m| keeps(m, opts, now))
        .cloned()
        .collect();
    out.sort_by_key(|m| m.start);
    out
}

/// Pick the meeting a status bar should show.
///
/// Prefers an ongoing meeting (the one ending soonest), otherwise the
/// earliest-starting upcoming meeting, otherwise nothing.
pub fn next_meeting(meetings: &[Meeting], now: NaiveDateTime) -> Option<&Meeting> {
    if let Some(ongoing) = meetings
        .iter()
        .filter(|m| m.is_ongoing_at(now))
        .min_by_key(|m| m.end)
    {
        return Some(ongoing);
    }
    meetings
        .iter()
        .filter(|m| m.start >= now)
        .min_by_key(|m| m.start)
}
