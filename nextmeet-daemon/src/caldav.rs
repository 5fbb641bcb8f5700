//! CalDAV meeting source.
//!
//! Issues a calendar-query REPORT with a server-side time-range filter
//! against the configured collection URL, parses the multistatus response,
//! and converts each VEVENT into a meeting. The configured URL must point
//! at the calendar collection itself.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use icalendar::parser::{Component, Property, read_calendar, unfold};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use nextmeet_core::{Meeting, NextmeetError, NextmeetResult};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::CaldavConfig;
use crate::source::CalendarSource;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// CalDAV time-range stamp: `YYYYMMDDTHHMMSSZ`.
const CALDAV_STAMP: &str = "%Y%m%dT%H%M%SZ";

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+").expect("url regex is valid"));

/// Fetches meetings from a CalDAV collection over HTTP.
pub struct CaldavSource {
    config: CaldavConfig,
    client: reqwest::Client,
}

impl CaldavSource {
    pub fn new(config: CaldavConfig) -> NextmeetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| NextmeetError::Fetch(format!("building HTTP client: {e}")))?;
        Ok(CaldavSource { config, client })
    }
}

impl CalendarSource for CaldavSource {
    async fn fetch(&self, _calendar: Option<&str>) -> NextmeetResult<Vec<Meeting>> {
        let now_utc = Utc::now();
        let window_start = now_utc - TimeDelta::hours(self.config.lookbehind_hours);
        let window_end = now_utc + TimeDelta::hours(self.config.lookahead_hours);
        let body = calendar_query(
            &window_start.format(CALDAV_STAMP).to_string(),
            &window_end.format(CALDAV_STAMP).to_string(),
        );

        let method = reqwest::Method::from_bytes(b"REPORT")
            .map_err(|e| NextmeetError::Fetch(e.to_string()))?;
        let mut request = self
            .client
            .request(method, &self.config.url)
            .header("Depth", "1")
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| NextmeetError::Fetch(format!("CalDAV request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NextmeetError::Fetch(format!(
                "CalDAV server returned {status} for {}",
                self.config.url
            )));
        }
        let text = response
            .text()
            .await
            .map_err(|e| NextmeetError::Fetch(format!("reading CalDAV response: {e}")))?;

        let now = Local::now().naive_local();
        let mut meetings: Vec<Meeting> = parse_multistatus(&text)?
            .iter()
            .flat_map(|ics| meetings_from_ics(ics, &self.config.url))
            .filter(|m| m.end > now)
            .collect();
        meetings.sort_by_key(|m| m.start);
        Ok(meetings)
    }
}

/// Calendar-query REPORT body asking for event data in a time window.
fn calendar_query(start: &str, end: &str) -> String {
    format!(
        r#"<C:calendar-query xmlns="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
    <prop>
        <getetag/>
        <C:calendar-data/>
    </prop>
    <C:filter>
        <C:comp-filter name="VCALENDAR">
            <C:comp-filter name="VEVENT">
                <C:time-range start="{start}" end="{end}"/>
            </C:comp-filter>
        </C:comp-filter>
    </C:filter>
</C:calendar-query>"#
    )
}

/// Pull every `calendar-data` blob out of a multistatus response.
fn parse_multistatus(body: &str) -> NextmeetResult<Vec<String>> {
    let doc = roxmltree::Document::parse(body)
        .map_err(|e| NextmeetError::Fetch(format!("invalid multistatus response: {e}")))?;
    let root = doc.root_element();

    let mut blobs = Vec::new();
    for response in root
        .descendants()
        .filter(|n| n.tag_name().name() == "response")
    {
        if let Some(data) = response
            .descendants()
            .find(|n| n.tag_name().name() == "calendar-data")
            .and_then(|n| n.text())
        {
            blobs.push(data.to_string());
        }
    }
    Ok(blobs)
}

/// Parse one ICS blob into meetings. Unreadable blobs and events missing a
/// start time are skipped rather than failing the fetch.
fn meetings_from_ics(ics: &str, default_calendar_url: &str) -> Vec<Meeting> {
    let unfolded = unfold(ics);
    let Ok(calendar) = read_calendar(&unfolded) else {
        return Vec::new();
    };
    calendar
        .components
        .iter()
        .filter(|c| c.name == "VEVENT")
        .filter_map(|vevent| meeting_from_vevent(vevent, default_calendar_url))
        .collect()
}

fn meeting_from_vevent(vevent: &Component, default_calendar_url: &str) -> Option<Meeting> {
    let title = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "(No title)".to_string());

    let start = vevent
        .find_prop("DTSTART")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_local_naive)?;
    let end = match vevent
        .find_prop("DTEND")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_local_naive)
    {
        Some(end) => end,
        None => {
            start
                + duration_from_prop(vevent.find_prop("DURATION"))
                    .unwrap_or_else(|| TimeDelta::hours(1))
        }
    };
    if end < start {
        return None;
    }

    let explicit_url = vevent.find_prop("URL").map(|p| p.val.to_string());
    let meet_url = explicit_url.clone().or_else(|| {
        ["DESCRIPTION", "LOCATION"].iter().find_map(|key| {
            vevent
                .find_prop(key)
                .and_then(|p| extract_url(p.val.as_ref()))
        })
    });

    Some(Meeting {
        title,
        start,
        end,
        calendar_url: explicit_url.unwrap_or_else(|| default_calendar_url.to_string()),
        meet_url,
        calendar_name: None,
    })
}

/// Everything collapses to naive local wall-clock time, matching what the
/// rest of the daemon reasons in.
fn to_local_naive(dpt: DatePerhapsTime) -> NaiveDateTime {
    match dpt {
        DatePerhapsTime::Date(d) => d.and_time(NaiveTime::MIN),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => {
            dt.with_timezone(&Local).naive_local()
        }
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => naive,
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            match tzid
                .parse::<chrono_tz::Tz>()
                .ok()
                .and_then(|tz| tz.from_local_datetime(&date_time).single())
            {
                Some(zoned) => zoned.with_timezone(&Local).naive_local(),
                // Unknown zone id: keep the wall-clock reading.
                None => date_time,
            }
        }
    }
}

fn duration_from_prop(prop: Option<&Property>) -> Option<TimeDelta> {
    let duration = iso8601::duration(prop?.val.as_ref()).ok()?;
    let std_duration: std::time::Duration = duration.into();
    TimeDelta::from_std(std_duration).ok()
}

fn extract_url(text: &str) -> Option<String> {
    URL_RE.find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ics(body: &str) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:TEST\r\nBEGIN:VEVENT\r\nUID:test-1\r\n{body}\r\nEND:VEVENT\r\nEND:VCALENDAR"
        )
    }

    #[test]
    fn test_multistatus_extracts_calendar_data_blobs() {
        let body = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/cal/1.ics</d:href>
    <d:propstat><d:prop><c:calendar-data>FIRST</c:calendar-data></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/cal/</d:href>
    <d:propstat><d:prop><d:getetag>"abc"</d:getetag></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/cal/2.ics</d:href>
    <d:propstat><d:prop><c:calendar-data>SECOND</c:calendar-data></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;
        let blobs = parse_multistatus(body).unwrap();
        assert_eq!(blobs, vec!["FIRST".to_string(), "SECOND".to_string()]);
    }

    #[test]
    fn test_bad_multistatus_is_a_fetch_error() {
        assert!(matches!(
            parse_multistatus("not xml at all"),
            Err(NextmeetError::Fetch(_))
        ));
    }

    #[test]
    fn test_vevent_becomes_meeting_with_floating_times() {
        let blob = ics(
            "SUMMARY:Design review\r\n\
             DTSTART:20250602T090000\r\n\
             DTEND:20250602T093000\r\n\
             DESCRIPTION:Join at https://meet.example/abc today",
        );
        let meetings = meetings_from_ics(&blob, "https://dav.example/cal/");
        assert_eq!(meetings.len(), 1);
        let m = &meetings[0];
        assert_eq!(m.title, "Design review");
        assert_eq!(m.start.to_string(), "2025-06-02 09:00:00");
        assert_eq!(m.end.to_string(), "2025-06-02 09:30:00");
        assert_eq!(m.meet_url.as_deref(), Some("https://meet.example/abc"));
        assert_eq!(m.calendar_url, "https://dav.example/cal/");
    }

    #[test]
    fn test_url_property_wins_over_description_link() {
        let blob = ics(
            "SUMMARY:Standup\r\n\
             DTSTART:20250602T090000\r\n\
             DTEND:20250602T091500\r\n\
             URL:https://meet.example/primary\r\n\
             DESCRIPTION:backup https://meet.example/backup",
        );
        let meetings = meetings_from_ics(&blob, "https://dav.example/cal/");
        assert_eq!(
            meetings[0].meet_url.as_deref(),
            Some("https://meet.example/primary")
        );
        assert_eq!(meetings[0].calendar_url, "https://meet.example/primary");
    }

    #[test]
    fn test_missing_dtend_uses_duration_then_one_hour() {
        let with_duration = ics(
            "SUMMARY:Focus\r\nDTSTART:20250602T090000\r\nDURATION:PT45M",
        );
        let meetings = meetings_from_ics(&with_duration, "https://dav.example/cal/");
        assert_eq!(meetings[0].end - meetings[0].start, TimeDelta::minutes(45));

        let bare = ics("SUMMARY:Focus\r\nDTSTART:20250602T090000");
        let meetings = meetings_from_ics(&bare, "https://dav.example/cal/");
        assert_eq!(meetings[0].end - meetings[0].start, TimeDelta::hours(1));
    }

    #[test]
    fn test_date_only_event_is_all_day() {
        let blob = ics(
            "SUMMARY:Offsite\r\n\
             DTSTART;VALUE=DATE:20250602\r\n\
             DTEND;VALUE=DATE:20250603",
        );
        let meetings = meetings_from_ics(&blob, "https://dav.example/cal/");
        assert_eq!(meetings.len(), 1);
        assert_eq!(meetings[0].start.to_string(), "2025-06-02 00:00:00");
        assert!(meetings[0].is_all_day());
    }

    #[test]
    fn test_unreadable_blob_is_skipped() {
        assert!(meetings_from_ics("garbage", "https://dav.example/cal/").is_empty());
        let no_start = ics("SUMMARY:No when");
        assert!(meetings_from_ics(&no_start, "https://dav.example/cal/").is_empty());
    }

    #[test]
    fn test_query_carries_time_range() {
        let body = calendar_query("20250602T000000Z", "20250604T000000Z");
        assert!(body.contains(r#"<C:time-range start="20250602T000000Z" end="20250604T000000Z"/>"#));
        assert!(body.contains("VEVENT"));
    }
}
