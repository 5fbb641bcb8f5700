//! nextmeetd: polls the calendar, serves queries over a UNIX socket, and
//! fires desktop notifications for upcoming meetings.

mod cache;
mod caldav;
mod config;
mod hub;
mod notify;
mod poll;
mod server;
mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

use crate::caldav::CaldavSource;
use crate::config::{CaldavConfig, DaemonConfig, NotifyConfig, UrgencyLevel};
use crate::notify::DesktopNotifySink;
use crate::server::Daemon;
use crate::source::{AnySource, GcalcliSource};

#[derive(Parser, Debug)]
#[command(name = "nextmeetd", version, about = "Next-meeting status daemon")]
struct Args {
    /// Path of the UNIX socket to listen on
    #[arg(long)]
    socket_path: Option<PathBuf>,

    /// Directory for notification ledger and snooze state
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Seconds between calendar polls
    #[arg(long, default_value_t = 60)]
    poll_interval: u64,

    /// Restrict fetching to one named calendar
    #[arg(long)]
    calendar: Option<String>,

    /// Fetch from this CalDAV collection URL instead of the calendar CLI
    #[arg(long)]
    caldav_url: Option<String>,

    /// Username for CalDAV basic auth
    #[arg(long, requires = "caldav_url")]
    caldav_username: Option<String>,

    /// Password for CalDAV basic auth
    #[arg(long, requires = "caldav_url")]
    caldav_password: Option<String>,

    /// Skip TLS certificate verification for the CalDAV server
    #[arg(long, requires = "caldav_url")]
    caldav_insecure: bool,

    /// Hours before now to include in the CalDAV query window
    #[arg(long, default_value_t = 12)]
    caldav_lookbehind_hours: i64,

    /// Hours after now to include in the CalDAV query window
    #[arg(long, default_value_t = 48)]
    caldav_lookahead_hours: i64,

    /// Enable desktop notifications
    #[arg(long)]
    enable_notify: bool,

    /// Minutes before a meeting to notify
    #[arg(long, default_value_t = 5)]
    notify_min_before: i64,

    /// Extra notification offsets in minutes, comma-separated
    #[arg(long, value_delimiter = ',')]
    notify_offsets: Vec<i64>,

    /// Icon name or path for notifications
    #[arg(long)]
    notify_icon: Option<String>,

    /// Notification expiry in milliseconds (0 = server default)
    #[arg(long, default_value_t = 0)]
    notify_expiry_ms: u32,

    /// Notification urgency
    #[arg(long, value_enum, default_value_t = UrgencyLevel::Normal)]
    notify_urgency: UrgencyLevel,

    /// Escalate urgency to critical within this many minutes of the start
    #[arg(long)]
    notify_critical_within: Option<i64>,

    /// Send a daily agenda summary at this local time (HH:MM)
    #[arg(long, value_parser = parse_hhmm)]
    morning_agenda: Option<NaiveTime>,
}

fn parse_hhmm(s: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("expected HH:MM: {e}"))
}

impl Args {
    fn into_config(self) -> Result<DaemonConfig> {
        let state_dir = match self.state_dir {
            Some(dir) => dir,
            None => nextmeet_core::paths::default_state_dir()?,
        };
        let socket_path = match self.socket_path {
            Some(path) => path,
            None => state_dir.join("socket"),
        };
        let caldav = self.caldav_url.map(|url| CaldavConfig {
            url,
            username: self.caldav_username,
            password: self.caldav_password,
            insecure: self.caldav_insecure,
            lookbehind_hours: self.caldav_lookbehind_hours,
            lookahead_hours: self.caldav_lookahead_hours,
        });
        Ok(DaemonConfig {
            socket_path,
            state_dir,
            poll_interval: Duration::from_secs(self.poll_interval.max(1)),
            calendar: self.calendar,
            caldav,
            notify: NotifyConfig {
                enabled: self.enable_notify,
                lead_time_mins: self.notify_min_before,
                extra_offsets: self.notify_offsets,
                icon: self.notify_icon,
                expiry_ms: self.notify_expiry_ms,
                urgency: self.notify_urgency,
                critical_within_mins: self.notify_critical_within,
                morning_agenda: self.morning_agenda,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("creating {}", config.state_dir.display()))?;

    let source = match &config.caldav {
        Some(caldav) => AnySource::Caldav(CaldavSource::new(caldav.clone())?),
        None => AnySource::Gcalcli(GcalcliSource),
    };
    let daemon = Arc::new(Daemon::new(config, source, Box::new(DesktopNotifySink)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("cannot install SIGINT handler: {e}");
                return;
            }
        };
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("cannot install SIGTERM handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    daemon.run(shutdown_rx).await
}
