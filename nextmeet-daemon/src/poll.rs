//! Background loops: periodic agenda polling and the morning-agenda timer.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime, TimeDelta};
use nextmeet_core::protocol::Event;
use nextmeet_core::{NextmeetResult, next_meeting};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::server::Daemon;
use crate::source::CalendarSource;

/// How far past the scheduled morning-agenda time a wakeup still counts.
/// A machine resuming from suspend hours later should stay quiet.
const AGENDA_WAKE_TOLERANCE: TimeDelta = TimeDelta::minutes(10);

/// One poll cycle: fetch, swap the cache, then derive events and
/// notifications from the fresh list. On error the cache keeps its
/// previous contents.
pub async fn poll_once<S: CalendarSource>(daemon: &Daemon<S>) -> NextmeetResult<()> {
    let meetings = daemon
        .source
        .fetch(daemon.config.calendar.as_deref())
        .await?;
    let now = Local::now().naive_local();
    tracing::debug!("fetched {} meetings", meetings.len());
    daemon.cache.write().await.replace(meetings, now);
    post_update(daemon, now).await;
    Ok(())
}

/// Derive `next_changed` and `notification` events from the current cache.
///
/// The "next" tracked here is unfiltered; per-client filters only apply to
/// RPC queries.
pub(crate) async fn post_update<S: CalendarSource>(daemon: &Daemon<S>, now: NaiveDateTime) {
    let snapshot = daemon.cache.read().await.snapshot();
    let next = next_meeting(&snapshot, now);

    let key = next.map(|m| m.dedup_key());
    let changed = {
        let mut last = daemon.last_next_key.lock();
        if *last != key {
            *last = key;
            true
        } else {
            false
        }
    };
    if changed {
        let data = next.map(|m| m.to_wire(now)).unwrap_or(Value::Null);
        daemon.hub.broadcast(&Event::new("next_changed", data));
    }

    if !daemon.config.notify.enabled {
        return;
    }
    let lead_times = daemon.config.notify.lead_times();
    for meeting in &snapshot {
        let mins = meeting.minutes_until(now);
        if mins < 0 || !lead_times.contains(&mins) {
            continue;
        }
        let fired = daemon.notify.lock().fire_meeting(meeting, mins, now);
        if fired {
            let mut data = meeting.to_wire(now);
            data["at_min"] = json!(mins);
            daemon.hub.broadcast(&Event::new("notification", data));
        }
    }
}

/// The periodic poll loop. The first cycle runs immediately so clients see
/// data as soon as the daemon is up; cycle failures are logged and the
/// stale cache keeps serving.
pub async fn run<S: CalendarSource>(daemon: Arc<Daemon<S>>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(daemon.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = poll_once(&daemon).await {
                    tracing::warn!("poll cycle failed, serving stale cache: {e}");
                }
            }
            _ = shutdown.changed() => return,
        }
    }
}

/// Fires the morning agenda once per day at the configured time.
pub async fn run_agenda<S: CalendarSource>(
    daemon: Arc<Daemon<S>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(at) = daemon.config.notify.morning_agenda else {
        return;
    };
    loop {
        let now = Local::now().naive_local();
        let mut target = now.date().and_time(at);
        if target <= now {
            target += TimeDelta::days(1);
        }
        let sleep_for = (target - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown.changed() => return,
        }

        // If we slept through (suspend), skip today rather than firing late.
        let woke = Local::now().naive_local();
        if woke - target > AGENDA_WAKE_TOLERANCE {
            tracing::debug!("overslept morning agenda by {}, skipping", woke - target);
            continue;
        }

        daemon.ensure_warm().await;
        let snapshot = daemon.cache.read().await.snapshot();
        let text = daemon.notify.lock().fire_agenda(&snapshot, woke);
        if let Some(text) = text {
            daemon
                .hub
                .broadcast(&Event::new("morning_agenda", json!({"text": text})));
        }
    }
}
