//! Turning the daemon's wire meetings into status-bar and terminal text.

use chrono::{Datelike, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Value, json};

/// A meeting as the daemon sends it, derived flags included.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMeeting {
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub calendar_url: String,
    #[serde(default)]
    pub meet_url: Option<String>,
    #[serde(default)]
    pub is_ongoing: bool,
    #[serde(default)]
    pub is_all_day: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Truncate titles to this many characters, ellipsis included.
    pub max_title_length: Option<usize>,
    /// Hide titles entirely, for status bars on shared screens.
    pub privacy: bool,
    /// 12-hour clock instead of 24-hour.
    pub ampm: bool,
}

impl RenderOptions {
    fn time(&self, t: NaiveDateTime) -> String {
        if self.ampm {
            t.format("%I:%M %p").to_string()
        } else {
            t.format("%H:%M").to_string()
        }
    }
}

pub fn display_title(meeting: &WireMeeting, opts: &RenderOptions) -> String {
    if opts.privacy {
        return "Busy".to_string();
    }
    match opts.max_title_length {
        Some(max) => ellipsize(&meeting.title, max),
        None => meeting.title.clone(),
    }
}

/// Truncate to `max` characters, the last one being an ellipsis.
fn ellipsize(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Relative phrasing for when the meeting happens.
pub fn when_text(meeting: &WireMeeting, now: NaiveDateTime, opts: &RenderOptions) -> String {
    if meeting.is_all_day {
        return "All day".to_string();
    }
    if meeting.is_ongoing {
        let left = (meeting.end - now).num_minutes().max(0);
        return format!("{left} min left");
    }
    let mins = (meeting.start - now).num_minutes();
    if mins < 1 {
        "now".to_string()
    } else if mins < 60 {
        format!("in {mins} min")
    } else if meeting.start.date() == now.date() {
        format!("at {}", opts.time(meeting.start))
    } else {
        format!("{} {}", meeting.start.format("%a"), opts.time(meeting.start))
    }
}

/// CSS class for status-bar styling.
pub fn css_class(meeting: &WireMeeting, now: NaiveDateTime) -> &'static str {
    if meeting.is_ongoing {
        "current"
    } else if (meeting.start - now).num_minutes() <= 5 {
        "soon"
    } else {
        "upcoming"
    }
}

/// One-line terminal/status text.
pub fn status_line(
    meeting: Option<&WireMeeting>,
    now: NaiveDateTime,
    opts: &RenderOptions,
) -> String {
    match meeting {
        Some(m) => format!("{} · {}", when_text(m, now, opts), display_title(m, opts)),
        None => "No meeting".to_string(),
    }
}

/// The JSON object a waybar `custom` module expects on stdout.
pub fn waybar(meeting: Option<&WireMeeting>, now: NaiveDateTime, opts: &RenderOptions) -> Value {
    match meeting {
        Some(m) => {
            let tooltip = format!(
                "{} ({} - {})\n{}",
                m.title,
                opts.time(m.start),
                opts.time(m.end),
                m.meet_url.as_deref().unwrap_or(&m.calendar_url),
            );
            json!({
                "text": status_line(Some(m), now, opts),
                "tooltip": tooltip,
                "class": css_class(m, now),
            })
        }
        None => json!({
            "text": "No meeting",
            "tooltip": "",
            "class": "empty",
        }),
    }
}
