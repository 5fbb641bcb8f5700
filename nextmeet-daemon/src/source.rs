//! Calendar source collaborators.
//!
//! The poll loop only needs a list of meetings; where they come from is
//! behind the [`CalendarSource`] trait. Two production backends exist: a
//! shell-out to `gcalcli` (discovered in PATH, piped stdio, bounded by a
//! timeout) and a CalDAV client in [`crate::caldav`].

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use nextmeet_core::{Meeting, NextmeetError, NextmeetResult, tsv};
use tokio::process::Command;
use tokio::time::timeout;

use crate::caldav::CaldavSource;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const GCALCLI_BIN: &str = "gcalcli";
const GCALCLI_ARGS: &[&str] = &[
    "--nocolor",
    "agenda",
    "today",
    "--nodeclined",
    "--details=end",
    "--details=url",
    "--tsv",
];

/// A source of meetings.
///
/// Failure must stay distinct from an empty agenda: an empty list means zero
/// meetings, an error keeps the previous cache.
pub trait CalendarSource: Send + Sync + 'static {
    fn fetch(
        &self,
        calendar: Option<&str>,
    ) -> impl Future<Output = NextmeetResult<Vec<Meeting>>> + Send;
}

/// Fetches today's agenda by running the `gcalcli` CLI and parsing its TSV
/// output.
#[derive(Debug, Clone, Default)]
pub struct GcalcliSource;

impl GcalcliSource {
    fn binary_path(&self) -> NextmeetResult<std::path::PathBuf> {
        which::which(GCALCLI_BIN)
            .map_err(|_| NextmeetError::FetcherNotInstalled(GCALCLI_BIN.to_string()))
    }
}

impl CalendarSource for GcalcliSource {
    async fn fetch(&self, calendar: Option<&str>) -> NextmeetResult<Vec<Meeting>> {
        let binary_path = self.binary_path()?;

        let mut cmd = Command::new(&binary_path);
        cmd.args(GCALCLI_ARGS)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(calendar) = calendar {
            cmd.arg("--calendar").arg(calendar);
        }

        let output = timeout(FETCH_TIMEOUT, async {
            cmd.output()
                .await
                .map_err(|e| NextmeetError::Fetch(format!("failed to run {GCALCLI_BIN}: {e}")))
        })
        .await
        .map_err(|_| NextmeetError::FetchTimeout(FETCH_TIMEOUT.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(NextmeetError::Fetch(if stderr.is_empty() {
                format!(
                    "{GCALCLI_BIN} exited with status {}",
                    output.status.code().unwrap_or(-1)
                )
            } else {
                stderr.to_string()
            }));
        }

        Ok(tsv::parse_agenda(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// The backend selected at startup.
pub enum AnySource {
    Gcalcli(GcalcliSource),
    Caldav(CaldavSource),
}

impl CalendarSource for AnySource {
    async fn fetch(&self, calendar: Option<&str>) -> NextmeetResult<Vec<Meeting>> {
        match self {
            AnySource::Gcalcli(source) => source.fetch(calendar).await,
            AnySource::Caldav(source) => source.fetch(calendar).await,
        }
    }
}
