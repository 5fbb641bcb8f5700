//! One-shot RPC calls and the event-stream subscription over the daemon
//! socket.

use std::path::Path;

use anyhow::{Context, Result, bail};
use nextmeet_core::protocol::{self, Event, Request, Response, ServerLine};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

pub struct Connection {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
    next_id: u64,
}

impl Connection {
    pub async fn open(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await.with_context(|| {
            format!(
                "connecting to {} (is nextmeetd running?)",
                socket_path.display()
            )
        })?;
        let (read, write) = stream.into_split();
        Ok(Connection {
            lines: BufReader::new(read).lines(),
            write,
            next_id: 1,
        })
    }

    /// Send one request and wait for its response, skipping any events that
    /// arrive in between.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.to_string();
        self.next_id += 1;
        let req = Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        self.write
            .write_all(protocol::to_json_line(&req)?.as_bytes())
            .await
            .context("writing request")?;

        loop {
            let Some(line) = self.lines.next_line().await.context("reading response")? else {
                bail!("daemon closed the connection");
            };
            match protocol::decode_server_line(&line)? {
                ServerLine::Event(_) => continue,
                ServerLine::Response(Response::Ok { id: got, result }) if got == id => {
                    return Ok(result);
                }
                ServerLine::Response(Response::Error { id: got, error }) if got == id => {
                    bail!("daemon error {}: {}", error.code, error.message);
                }
                ServerLine::Response(_) => continue,
            }
        }
    }

    /// Subscribe to the given topics (empty = all) and hand each event to
    /// `on_event` until the daemon goes away.
    pub async fn watch(
        &mut self,
        topics: &[String],
        mut on_event: impl FnMut(Event),
    ) -> Result<()> {
        self.call("subscribe", json!({"topics": topics})).await?;
        loop {
            let Some(line) = self.lines.next_line().await.context("reading event")? else {
                return Ok(());
            };
            if let ServerLine::Event(event) = protocol::decode_server_line(&line)? {
                on_event(event);
            }
        }
    }
}
