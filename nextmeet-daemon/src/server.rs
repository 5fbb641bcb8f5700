//! The daemon core: socket accept loop, per-connection read loops and the
//! RPC dispatcher.
//!
//! Each connection gets a read loop plus a writer task fed by a channel;
//! the hub holds a clone of the channel sender for subscribed connections,
//! so responses and broadcast events interleave safely on one stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use nextmeet_core::protocol::{self, Request, Response};
use nextmeet_core::{FilterOptions, apply_filters, next_meeting};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::sync::{RwLock, watch};

use crate::cache::MeetingCache;
use crate::config::DaemonConfig;
use crate::hub::Hub;
use crate::notify::{DesktopNotifier, NotifyState};
use crate::poll;
use crate::source::CalendarSource;

pub struct Daemon<S: CalendarSource> {
    pub(crate) config: DaemonConfig,
    pub(crate) source: S,
    pub(crate) cache: RwLock<MeetingCache>,
    pub(crate) hub: Hub,
    pub(crate) notify: parking_lot::Mutex<NotifyState>,
    /// Identity of the meeting last broadcast as "next".
    pub(crate) last_next_key: parking_lot::Mutex<Option<String>>,
    conn_ids: AtomicU64,
}

impl<S: CalendarSource> Daemon<S> {
    pub fn new(config: DaemonConfig, source: S, notifier: Box<dyn DesktopNotifier>) -> Self {
        let notify = NotifyState::new(
            config.notify.clone(),
            config.state_dir.clone(),
            notifier,
        );
        Daemon {
            config,
            source,
            cache: RwLock::new(MeetingCache::default()),
            hub: Hub::default(),
            notify: parking_lot::Mutex::new(notify),
            last_next_key: parking_lot::Mutex::new(None),
            conn_ids: AtomicU64::new(0),
        }
    }

    /// Bind the socket and serve until the shutdown signal flips.
    ///
    /// Failing to bind is the only fatal error in the daemon; everything
    /// else degrades per-connection or per-cycle.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        let socket_path = self.config.socket_path.clone();
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        // A previous run may have left the socket behind.
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        }
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("binding {}", socket_path.display()))?;
        tracing::info!("listening on {}", socket_path.display());

        tokio::spawn(poll::run(self.clone(), shutdown.clone()));
        if self.config.notify.morning_agenda.is_some() {
            tokio::spawn(poll::run_agenda(self.clone(), shutdown.clone()));
        }

        let mut shutdown_accept = shutdown.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(handle_connection(
                                self.clone(),
                                stream,
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => tracing::warn!("accept failed: {e}"),
                    }
                }
                _ = shutdown_accept.changed() => break,
            }
        }

        if let Err(e) = std::fs::remove_file(&socket_path) {
            tracing::debug!("could not remove {}: {e}", socket_path.display());
        }
        Ok(())
    }

    /// Warm the cache with one eager fetch if no poll cycle has succeeded
    /// yet. Failures are logged, not surfaced: a cold cache just means
    /// empty results.
    pub(crate) async fn ensure_warm(&self) {
        if !self.cache.read().await.is_cold() {
            return;
        }
        if let Err(e) = poll::poll_once(self).await {
            tracing::warn!("cold-cache fetch failed: {e}");
        }
    }

    pub(crate) async fn dispatch(&self, req: &Request) -> Response {
        match req.method.as_str() {
            "ping" => Response::ok(&req.id, json!("pong")),
            "version" => Response::ok(&req.id, json!({"version": env!("CARGO_PKG_VERSION")})),
            "get_next" => wrap(&req.id, self.rpc_get_next(&req.params).await),
            "list" => wrap(&req.id, self.rpc_list(&req.params).await),
            "snooze" => wrap(&req.id, self.rpc_snooze(&req.params)),
            other => Response::error(&req.id, 404, format!("unknown method: {other}")),
        }
    }

    async fn filtered_snapshot(
        &self,
        params: &Value,
        now: NaiveDateTime,
    ) -> Result<Vec<nextmeet_core::Meeting>> {
        self.ensure_warm().await;
        let opts: FilterOptions = serde_json::from_value(params.clone())
            .with_context(|| "invalid filter params")?;
        let snapshot = self.cache.read().await.snapshot();
        Ok(apply_filters(&snapshot, &opts, now))
    }

    async fn rpc_get_next(&self, params: &Value) -> Result<Value> {
        let now = Local::now().naive_local();
        let filtered = self.filtered_snapshot(params, now).await?;
        Ok(next_meeting(&filtered, now)
            .map(|m| m.to_wire(now))
            .unwrap_or(Value::Null))
    }

    async fn rpc_list(&self, params: &Value) -> Result<Value> {
        let now = Local::now().naive_local();
        let mut filtered = self.filtered_snapshot(params, now).await?;
        let limit = params.get("limit").and_then(Value::as_i64).unwrap_or(0);
        if limit > 0 {
            filtered.truncate(limit as usize);
        }
        let items: Vec<Value> = filtered.iter().map(|m| m.to_wire(now)).collect();
        Ok(Value::Array(items))
    }

    fn rpc_snooze(&self, params: &Value) -> Result<Value> {
        let minutes = params.get("minutes").and_then(Value::as_i64).unwrap_or(0);
        match self.notify.lock().snooze(minutes) {
            Some(until_monotonic) => Ok(json!({
                "snoozed": true,
                "until_monotonic": until_monotonic,
            })),
            None => Ok(json!({"snoozed": false})),
        }
    }

    fn handle_subscribe(
        &self,
        conn_id: u64,
        req: &Request,
        tx: UnboundedSender<String>,
    ) -> Response {
        let topics: Vec<String> = req
            .params
            .get("topics")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        self.hub.subscribe(conn_id, topics.clone(), tx);
        Response::ok(&req.id, json!({"subscribed": topics}))
    }
}

fn wrap(id: &str, outcome: Result<Value>) -> Response {
    match outcome {
        Ok(result) => Response::ok(id, result),
        Err(e) => Response::error(id, 500, e.to_string()),
    }
}

/// Per-connection read loop. Transport errors terminate only this
/// connection; dispatch errors go back as error envelopes and the
/// connection stays usable.
async fn handle_connection<S: CalendarSource>(
    daemon: Arc<Daemon<S>>,
    stream: UnixStream,
    mut shutdown: watch::Receiver<bool>,
) {
    let conn_id = daemon.conn_ids.fetch_add(1, Ordering::Relaxed);
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            // EOF or a broken stream ends the connection.
            Ok(None) | Err(_) => break,
        };
        // An empty line signals termination, same as EOF.
        if line.trim().is_empty() {
            break;
        }
        let req = match protocol::decode_request(&line) {
            Ok(req) => req,
            Err(e) => {
                // The stream is not resynchronizable after a bad line.
                tracing::warn!(conn_id, "closing connection: {e}");
                break;
            }
        };
        let resp = if req.method == "subscribe" {
            daemon.handle_subscribe(conn_id, &req, tx.clone())
        } else {
            daemon.dispatch(&req).await
        };
        match protocol::to_json_line(&resp) {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(conn_id, "dropping response: {e}"),
        }
    }

    daemon.hub.remove(conn_id);
    drop(tx);
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NotifyConfig, UrgencyLevel};
    use crate::notify::DesktopNotifier;
    use nextmeet_core::NextmeetResult;
    use nextmeet_core::protocol::{Event, ServerLine};
    use std::path::Path;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    struct NullNotifier;
    impl DesktopNotifier for NullNotifier {
        fn send(&self, _: &str, _: &str, _: Option<&str>, _: u32, _: UrgencyLevel) {}
    }

    /// Serves a fixed agenda; lines use the gcalcli TSV grammar.
    #[derive(Clone)]
    struct FixedSource(String);

    impl CalendarSource for FixedSource {
        async fn fetch(&self, _calendar: Option<&str>) -> NextmeetResult<Vec<nextmeet_core::Meeting>> {
            Ok(nextmeet_core::tsv::parse_agenda(&self.0))
        }
    }

    fn test_config(dir: &Path) -> DaemonConfig {
        DaemonConfig {
            socket_path: dir.join("socket"),
            state_dir: dir.to_path_buf(),
            // Long enough that only the startup tick runs during a test.
            poll_interval: Duration::from_secs(3600),
            calendar: None,
            caldav: None,
            notify: NotifyConfig {
                enabled: false,
                lead_time_mins: 5,
                extra_offsets: vec![],
                icon: None,
                expiry_ms: 0,
                urgency: UrgencyLevel::Normal,
                critical_within_mins: None,
                morning_agenda: None,
            },
        }
    }

    fn agenda_line(start: chrono::NaiveDateTime, title: &str) -> String {
        let end = start + chrono::TimeDelta::minutes(30);
        format!(
            "{}\t{}\t{}\t{}\thttps://cal.example/e\t\t{}\n",
            start.format("%Y-%m-%d"),
            start.format("%H:%M"),
            end.format("%Y-%m-%d"),
            end.format("%H:%M"),
            title,
        )
    }

    async fn start_daemon(
        dir: &Path,
        agenda: &str,
    ) -> (Arc<Daemon<FixedSource>>, watch::Sender<bool>) {
        let daemon = Arc::new(Daemon::new(
            test_config(dir),
            FixedSource(agenda.to_string()),
            Box::new(NullNotifier),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(daemon.clone().run(shutdown_rx));
        let socket = dir.join("socket");
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        (daemon, shutdown_tx)
    }

    async fn roundtrip(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
        write: &mut tokio::net::unix::OwnedWriteHalf,
        req: &Request,
    ) -> Response {
        write
            .write_all(protocol::to_json_line(req).unwrap().as_bytes())
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        match protocol::decode_server_line(&line).unwrap() {
            ServerLine::Response(resp) => resp,
            other => panic!("expected response, got {other:?}"),
        }
    }

    fn request(id: &str, method: &str, params: Value) -> Request {
        Request {
            id: id.to_string(),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_ping_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let (_daemon, shutdown) = start_daemon(dir.path(), "").await;
        let stream = UnixStream::connect(dir.path().join("socket")).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let resp = roundtrip(&mut lines, &mut write, &request("1", "ping", json!({}))).await;
        assert_eq!(resp, Response::ok("1", json!("pong")));

        let resp = roundtrip(&mut lines, &mut write, &request("2", "version", json!({}))).await;
        match resp {
            Response::Ok { result, .. } => assert!(result["version"].is_string()),
            other => panic!("unexpected {other:?}"),
        }
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_unknown_method_is_404_and_connection_survives() {
        let dir = tempfile::tempdir().unwrap();
        let (_daemon, shutdown) = start_daemon(dir.path(), "").await;
        let stream = UnixStream::connect(dir.path().join("socket")).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let resp = roundtrip(&mut lines, &mut write, &request("1", "bogus", json!({}))).await;
        match resp {
            Response::Error { error, .. } => {
                assert_eq!(error.code, 404);
                assert!(error.message.contains("bogus"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let resp = roundtrip(&mut lines, &mut write, &request("2", "ping", json!({}))).await;
        assert_eq!(resp, Response::ok("2", json!("pong")));
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_get_next_and_list_serve_from_warm_cache() {
        let now = Local::now().naive_local();
        let agenda = format!(
            "{}{}",
            agenda_line(now + chrono::TimeDelta::minutes(45), "Later"),
            agenda_line(now + chrono::TimeDelta::minutes(10), "Soon"),
        );
        let dir = tempfile::tempdir().unwrap();
        let (_daemon, shutdown) = start_daemon(dir.path(), &agenda).await;
        let stream = UnixStream::connect(dir.path().join("socket")).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let resp =
            roundtrip(&mut lines, &mut write, &request("1", "get_next", json!({}))).await;
        match resp {
            Response::Ok { result, .. } => assert_eq!(result["title"], "Soon"),
            other => panic!("unexpected {other:?}"),
        }

        let resp = roundtrip(
            &mut lines,
            &mut write,
            &request("2", "list", json!({"within_mins": 30})),
        )
        .await;
        match resp {
            Response::Ok { result, .. } => {
                let items = result.as_array().unwrap();
                assert_eq!(items.len(), 1);
                assert_eq!(items[0]["title"], "Soon");
            }
            other => panic!("unexpected {other:?}"),
        }

        let resp = roundtrip(
            &mut lines,
            &mut write,
            &request("3", "list", json!({"limit": 1})),
        )
        .await;
        match resp {
            Response::Ok { result, .. } => assert_eq!(result.as_array().unwrap().len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_subscriber_receives_next_changed_on_repoll() {
        let now = Local::now().naive_local();
        let dir = tempfile::tempdir().unwrap();
        let first = agenda_line(now + chrono::TimeDelta::minutes(2), "A");
        let (daemon, shutdown) = start_daemon(dir.path(), &first).await;
        // Let the startup poll land so it cannot race the subscription.
        for _ in 0..100 {
            if daemon.last_next_key.lock().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stream = UnixStream::connect(dir.path().join("socket")).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let ack = roundtrip(
            &mut lines,
            &mut write,
            &request("1", "subscribe", json!({"topics": ["next"]})),
        )
        .await;
        assert_eq!(ack, Response::ok("1", json!({"subscribed": ["next"]})));

        // Subscribing does not forbid further RPCs on the same connection.
        let resp = roundtrip(&mut lines, &mut write, &request("2", "ping", json!({}))).await;
        assert_eq!(resp, Response::ok("2", json!("pong")));

        // First poll already happened at startup; re-poll with meeting B.
        let second = agenda_line(now + chrono::TimeDelta::minutes(1), "B");
        let meetings = nextmeet_core::tsv::parse_agenda(&second);
        daemon
            .cache
            .write()
            .await
            .replace(meetings, Local::now().naive_local());
        poll::post_update(&daemon, Local::now().naive_local()).await;

        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match protocol::decode_server_line(&line).unwrap() {
            ServerLine::Event(Event { event, data }) => {
                assert_eq!(event, "next_changed");
                assert_eq!(data["title"], "B");
            }
            other => panic!("expected event, got {other:?}"),
        }
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_snooze_rpc_reports_monotonic_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let (_daemon, shutdown) = start_daemon(dir.path(), "").await;
        let stream = UnixStream::connect(dir.path().join("socket")).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let resp = roundtrip(
            &mut lines,
            &mut write,
            &request("1", "snooze", json!({"minutes": 10})),
        )
        .await;
        match resp {
            Response::Ok { result, .. } => {
                assert_eq!(result["snoozed"], true);
                assert!(result["until_monotonic"].as_f64().unwrap() > 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }

        let resp = roundtrip(
            &mut lines,
            &mut write,
            &request("2", "snooze", json!({"minutes": 0})),
        )
        .await;
        assert_eq!(resp, Response::ok("2", json!({"snoozed": false})));
        let _ = shutdown.send(true);
    }

    #[tokio::test]
    async fn test_malformed_line_closes_only_that_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (_daemon, shutdown) = start_daemon(dir.path(), "").await;

        let stream = UnixStream::connect(dir.path().join("socket")).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        write.write_all(b"{not json\n").await.unwrap();
        assert!(lines.next_line().await.unwrap().is_none());

        // A fresh connection still works.
        let stream = UnixStream::connect(dir.path().join("socket")).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        let resp = roundtrip(&mut lines, &mut write, &request("1", "ping", json!({}))).await;
        assert_eq!(resp, Response::ok("1", json!("pong")));
        let _ = shutdown.send(true);
    }
}
