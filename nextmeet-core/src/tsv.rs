//! Parsing of the calendar CLI's TSV agenda output.
//!
//! Each line carries start date/time, end date/time, the calendar web URL,
//! an optional meeting link and the title. Malformed lines are skipped
//! rather than failing the whole agenda.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::meeting::Meeting;

static AGENDA_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^
        (?P<start_date>\d{4}-\d{2}-\d{2})\s+
        (?P<start_time>\d{2}:\d{2})\s+
        (?P<end_date>\d{4}-\d{2}-\d{2})\s+
        (?P<end_time>\d{2}:\d{2})\s+
        (?P<calendar_url>https://\S+)\s+
        (?P<meet_url>https://\S+)?\s*
        (?P<title>.*)$",
    )
    .expect("agenda line regex is valid")
});

fn parse_stamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M").ok()?;
    Some(date.and_time(time))
}

/// Parse a single agenda line. Returns `None` when the line does not match
/// the grammar or violates `start <= end`.
pub fn parse_line(line: &str) -> Option<Meeting> {
    let caps = AGENDA_LINE.captures(line.trim_end())?;
    let start = parse_stamp(&caps["start_date"], &caps["start_time"])?;
    let end = parse_stamp(&caps["end_date"], &caps["end_time"])?;
    if end < start {
        return None;
    }
    Some(Meeting {
        title: caps["title"].trim().to_string(),
        start,
        end,
        calendar_url: caps["calendar_url"].to_string(),
        meet_url: caps.name("meet_url").map(|m| m.as_str().to_string()),
        calendar_name: None,
    })
}

/// Parse a whole agenda, skipping malformed lines, sorted by start time.
pub fn parse_agenda(raw: &str) -> Vec<Meeting> {
    let mut meetings: Vec<Meeting> = raw.lines().filter_map(parse_line).collect();
    meetings.sort_by_key(|m| m.start);
    meetings
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "2025-06-02\t09:00\t2025-06-02\t09:30\t\
        https://www.google.com/calendar/event?eid=abc\t\
        https://meet.google.com/xyz-abcd-efg\tDaily standup";

    #[test]
    fn test_parse_full_line() {
        let m = parse_line(LINE).unwrap();
        assert_eq!(m.title, "Daily standup");
        assert_eq!(m.start.to_string(), "2025-06-02 09:00:00");
        assert_eq!(m.end.to_string(), "2025-06-02 09:30:00");
        assert_eq!(
            m.meet_url.as_deref(),
            Some("https://meet.google.com/xyz-abcd-efg")
        );
    }

    #[test]
    fn test_parse_line_without_meet_url() {
        let line = "2025-06-02\t14:00\t2025-06-02\t15:00\t\
            https://www.google.com/calendar/event?eid=def\t\tFocus block";
        let m = parse_line(line).unwrap();
        assert_eq!(m.title, "Focus block");
        assert!(m.meet_url.is_none());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let raw = format!("not an agenda line\n{LINE}\n2025-13-99 nope\n");
        let meetings = parse_agenda(&raw);
        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].title, "Daily standup");
    }

    #[test]
    fn test_line_with_end_before_start_is_skipped() {
        let line = "2025-06-02\t10:00\t2025-06-02\t09:00\t\
            https://www.google.com/calendar/event?eid=ghi\t\tBackwards";
        assert!(parse_line(line).is_none());
    }

    #[test]
    fn test_agenda_is_sorted_by_start() {
        let raw = "\
2025-06-02\t15:00\t2025-06-02\t16:00\thttps://cal.example/2\t\tSecond
2025-06-02\t09:00\t2025-06-02\t10:00\thttps://cal.example/1\t\tFirst
";
        let titles: Vec<String> = parse_agenda(raw).into_iter().map(|m| m.title).collect();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[test]
    fn test_empty_agenda_is_empty_not_error() {
        assert!(parse_agenda("").is_empty());
    }
}
