//! Desktop notification dispatch, dedup ledger and snooze gate.
//!
//! Per (meeting occurrence, lead-time mark) the state moves one way, from
//! not-fired to fired, within a run. A fired mark is recorded even when the
//! desktop delivery fails, so a flaky notifier cannot cause a storm. The
//! on-disk state is best-effort only: a capped ring of recently fired ids
//! and a single snooze-until timestamp; corrupt or missing files read as
//! empty.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;
use nextmeet_core::Meeting;

use crate::config::{NotifyConfig, UrgencyLevel};

/// Ring-buffer cap for the on-disk list of fired notification ids.
const MAX_RECORDED_IDS: usize = 30;
const NOTIFIED_FILE: &str = "notified.json";
const SNOOZE_FILE: &str = "snooze";

/// How many meetings the morning agenda body lists at most.
const AGENDA_MAX_LINES: usize = 10;

impl From<UrgencyLevel> for notify_rust::Urgency {
    fn from(level: UrgencyLevel) -> Self {
        match level {
            UrgencyLevel::Low => notify_rust::Urgency::Low,
            UrgencyLevel::Normal => notify_rust::Urgency::Normal,
            UrgencyLevel::Critical => notify_rust::Urgency::Critical,
        }
    }
}

/// Fire-and-forget desktop notification sink.
pub trait DesktopNotifier: Send + 'static {
    fn send(
        &self,
        title: &str,
        body: &str,
        icon: Option<&str>,
        expiry_ms: u32,
        urgency: UrgencyLevel,
    );
}

/// Sends through the desktop notification service.
pub struct DesktopNotifySink;

impl DesktopNotifier for DesktopNotifySink {
    fn send(
        &self,
        title: &str,
        body: &str,
        icon: Option<&str>,
        expiry_ms: u32,
        urgency: UrgencyLevel,
    ) {
        let mut notification = notify_rust::Notification::new();
        notification.summary(title).body(body).urgency(urgency.into());
        if let Some(icon) = icon {
            notification.icon(icon);
        }
        if expiry_ms > 0 {
            notification.timeout(notify_rust::Timeout::Milliseconds(expiry_ms));
        }
        // Delivery failure is non-fatal; the dedup mark is already taken.
        if let Err(e) = notification.show() {
            tracing::debug!("desktop notification failed: {e}");
        }
    }
}

/// Dedup ledger plus snooze window, shared by the poll loop and the
/// `snooze` RPC handler behind one lock.
pub struct NotifyState {
    config: NotifyConfig,
    state_dir: PathBuf,
    notifier: Box<dyn DesktopNotifier>,
    /// Monotonic anchor for reporting snooze deadlines to clients.
    started: Instant,
    /// dedup key -> lead-time marks already fired this run.
    fired: HashMap<String, HashSet<i64>>,
    /// Recently fired ids, oldest first, mirrored to disk.
    recent_ids: Vec<String>,
    snoozed_until: Option<Instant>,
}

impl NotifyState {
    pub fn new(config: NotifyConfig, state_dir: PathBuf, notifier: Box<dyn DesktopNotifier>) -> Self {
        let recent_ids = load_recent_ids(&state_dir.join(NOTIFIED_FILE));
        let snoozed_until = load_snooze(&state_dir.join(SNOOZE_FILE));
        NotifyState {
            config,
            state_dir,
            notifier,
            started: Instant::now(),
            fired: HashMap::new(),
            recent_ids,
            snoozed_until,
        }
    }

    /// Set or clear the snooze window. Returns the deadline in monotonic
    /// seconds since daemon start when a window was set.
    pub fn snooze(&mut self, minutes: i64) -> Option<f64> {
        let snooze_path = self.state_dir.join(SNOOZE_FILE);
        if minutes <= 0 {
            self.snoozed_until = None;
            let _ = fs::remove_file(&snooze_path);
            return None;
        }
        let window = Duration::from_secs(minutes as u64 * 60);
        let until = Instant::now() + window;
        self.snoozed_until = Some(until);
        persist_snooze(&snooze_path, window);
        Some(until.duration_since(self.started).as_secs_f64())
    }

    pub fn is_snoozed(&self) -> bool {
        self.snoozed_until.is_some_and(|until| Instant::now() < until)
    }

    /// Fire a notification for a meeting at the given lead-time mark.
    ///
    /// Returns true when the notifier was invoked. A repeated (occurrence,
    /// mark) pair is a no-op; a snoozed attempt fires nothing and records
    /// nothing, so the mark stays eligible after the snooze expires.
    pub fn fire_meeting(&mut self, meeting: &Meeting, mark: i64, now: NaiveDateTime) -> bool {
        let key = meeting.dedup_key();
        let id = format!("{key}|{mark}");
        if self.fired.get(&key).is_some_and(|marks| marks.contains(&mark))
            || self.recent_ids.contains(&id)
        {
            return false;
        }
        if self.is_snoozed() {
            return false;
        }

        self.fired.entry(key).or_default().insert(mark);
        self.record_id(id);

        let mut urgency = self.config.urgency;
        if let Some(window) = self.config.critical_within_mins {
            let mins = meeting.minutes_until(now);
            if (0..=window).contains(&mins) {
                urgency = UrgencyLevel::Critical;
            }
        }
        let body = meeting
            .meet_url
            .clone()
            .unwrap_or_else(|| meeting.calendar_url.clone());
        self.notifier.send(
            &meeting.title,
            &body,
            self.config.icon.as_deref(),
            self.config.expiry_ms,
            urgency,
        );
        true
    }

    /// Fire the once-per-day morning agenda. Returns the summary text when
    /// it fired; `None` when already fired today or snoozed.
    pub fn fire_agenda(&mut self, meetings: &[Meeting], now: NaiveDateTime) -> Option<String> {
        let marker = format!("agenda-{}", now.format("%Y%m%d"));
        if self.recent_ids.contains(&marker) {
            return None;
        }
        if self.is_snoozed() {
            return None;
        }
        self.record_id(marker);

        let text = agenda_summary(meetings, now);
        self.notifier.send(
            "Morning agenda",
            &text,
            self.config.icon.as_deref(),
            self.config.expiry_ms,
            self.config.urgency,
        );
        Some(text)
    }

    fn record_id(&mut self, id: String) {
        self.recent_ids.push(id);
        if self.recent_ids.len() > MAX_RECORDED_IDS {
            let overflow = self.recent_ids.len() - MAX_RECORDED_IDS;
            self.recent_ids.drain(..overflow);
        }
        let path = self.state_dir.join(NOTIFIED_FILE);
        if let Err(e) = persist_recent_ids(&path, &self.recent_ids) {
            tracing::debug!("could not persist {}: {e}", path.display());
        }
    }
}

/// "HH:MM title" for each of today's meetings, or a placeholder.
pub fn agenda_summary(meetings: &[Meeting], now: NaiveDateTime) -> String {
    let lines: Vec<String> = meetings
        .iter()
        .filter(|m| m.start.date() == now.date())
        .take(AGENDA_MAX_LINES)
        .map(|m| format!("{} {}", m.start.format("%H:%M"), m.title))
        .collect();
    if lines.is_empty() {
        "No meetings today".to_string()
    } else {
        lines.join("\n")
    }
}

fn load_recent_ids(path: &Path) -> Vec<String> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Vec::new();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

fn persist_recent_ids(path: &Path, ids: &[String]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(ids).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

/// The snooze file holds a wall-clock epoch-seconds deadline so a restart
/// keeps an active snooze; monotonic time does not survive the process.
fn load_snooze(path: &Path) -> Option<Instant> {
    let raw = fs::read_to_string(path).ok()?;
    let until_epoch: u64 = raw.trim().parse().ok()?;
    let now_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs();
    let remaining = until_epoch.checked_sub(now_epoch)?;
    Some(Instant::now() + Duration::from_secs(remaining))
}

fn persist_snooze(path: &Path, window: Duration) {
    let Ok(now_epoch) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return;
    };
    let until_epoch = (now_epoch + window).as_secs();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Err(e) = fs::write(path, until_epoch.to_string()) {
        tracing::debug!("could not persist {}: {e}", path.display());
    }
}
