//! Control socket server.
//!
//! Listens on a Unix domain socket, accepts NDJSON commands, and forwards
//! them to the daemon's event loop over a channel; each command carries a
//! oneshot for its response. A `watch` command instead registers a UI event
//! subscriber and turns the connection into a one-way event stream.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command::{ControlCommand, ControlResponse};
use crate::event::UiEvent;

/// Channel type for commands flowing from the socket server to the daemon
/// loop. Each command includes a oneshot sender for its response.
pub type ControlCmdTx = mpsc::Sender<(ControlCommand, oneshot::Sender<ControlResponse>)>;
pub type ControlCmdRx = mpsc::Receiver<(ControlCommand, oneshot::Sender<ControlResponse>)>;

/// Channel delivering new `watch` subscribers to the daemon loop.
pub type SubscriberTx = mpsc::Sender<mpsc::Sender<UiEvent>>;
pub type SubscriberRx = mpsc::Receiver<mpsc::Sender<UiEvent>>;

/// Per-watcher event buffer. A UI that stops reading gets dropped rather
/// than stalling the daemon.
const WATCH_BUFFER: usize = 128;

/// Running control server. Dropping the handle aborts the accept loop and
/// removes the socket file.
pub struct ControlServerHandle {
    socket_path: PathBuf,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for ControlServerHandle {
    fn drop(&mut self) {
        self.task.abort();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Bind the control socket and spawn the accept loop.
///
/// Returns the command receiver and the subscriber receiver for the daemon
/// loop, plus a handle that owns the listener task.
pub fn spawn_control_server(
    socket_path: &Path,
) -> Result<(ControlServerHandle, ControlCmdRx, SubscriberRx), String> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create socket dir: {e}"))?;
    }
    // Remove stale socket file from a previous run.
    if socket_path.exists() {
        let _ = std::fs::remove_file(socket_path);
    }

    let listener = UnixListener::bind(socket_path)
        .map_err(|e| format!("failed to bind control socket {}: {e}", socket_path.display()))?;

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (sub_tx, sub_rx) = mpsc::channel(16);

    info!(path = %socket_path.display(), "control socket listening");

    let task = tokio::spawn(accept_loop(listener, cmd_tx, sub_tx));

    Ok((
        ControlServerHandle {
            socket_path: socket_path.to_path_buf(),
            task,
        },
        cmd_rx,
        sub_rx,
    ))
}

async fn accept_loop(listener: UnixListener, cmd_tx: ControlCmdTx, sub_tx: SubscriberTx) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let cmd_tx = cmd_tx.clone();
                let sub_tx = sub_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cmd_tx, sub_tx).await {
                        debug!(error = %e, "control connection ended");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "control socket accept error");
            }
        }
    }
}

/// Handle one client: request/response until EOF, or stream events after a
/// `watch` command.
async fn handle_connection(
    stream: UnixStream,
    cmd_tx: ControlCmdTx,
    sub_tx: SubscriberTx,
) -> Result<(), String> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await.map_err(|e| e.to_string())? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command: ControlCommand = match serde_json::from_str(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                write_response(&mut writer, &ControlResponse::error(format!("invalid JSON: {e}")))
                    .await?;
                continue;
            }
        };

        if matches!(command, ControlCommand::Watch) {
            let (event_tx, mut event_rx) = mpsc::channel::<UiEvent>(WATCH_BUFFER);
            if sub_tx.send(event_tx).await.is_err() {
                write_response(&mut writer, &ControlResponse::error("daemon shutting down"))
                    .await?;
                return Ok(());
            }
            write_response(&mut writer, &ControlResponse::ok("watching")).await?;

            // One-way stream from here on. Ends when the daemon drops the
            // sender or the client disconnects.
            while let Some(event) = event_rx.recv().await {
                let mut json = serde_json::to_string(&event).map_err(|e| e.to_string())?;
                json.push('\n');
                if writer.write_all(json.as_bytes()).await.is_err() {
                    return Ok(());
                }
            }
            return Ok(());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if cmd_tx.send((command, reply_tx)).await.is_err() {
            write_response(&mut writer, &ControlResponse::error("daemon shutting down")).await?;
            return Ok(());
        }

        let response = match reply_rx.await {
            Ok(response) => response,
            Err(_) => ControlResponse::error("command dropped"),
        };
        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

async fn write_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &ControlResponse,
) -> Result<(), String> {
    let mut json = serde_json::to_string(response).map_err(|e| e.to_string())?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn send_line(stream: &mut UnixStream, line: &str) -> String {
        let (reader, mut writer) = stream.split();
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .unwrap();
        let mut lines = BufReader::new(reader).lines();
        lines.next_line().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn command_roundtrip_through_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let (_handle, mut cmd_rx, _sub_rx) = spawn_control_server(&path).unwrap();

        // Echo responder standing in for the daemon loop.
        tokio::spawn(async move {
            while let Some((command, reply)) = cmd_rx.recv().await {
                let _ = reply.send(ControlResponse::ok(format!("{command:?}")));
            }
        });

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let reply = send_line(&mut stream, r#"{"type": "get_status"}"#).await;
        let response: ControlResponse = serde_json::from_str(&reply).unwrap();
        assert!(response.ok);
        assert!(response.message.contains("GetStatus"));
    }

    #[tokio::test]
    async fn invalid_json_reports_error_without_closing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let (_handle, mut cmd_rx, _sub_rx) = spawn_control_server(&path).unwrap();

        tokio::spawn(async move {
            while let Some((_command, reply)) = cmd_rx.recv().await {
                let _ = reply.send(ControlResponse::ok("fine"));
            }
        });

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let reply = send_line(&mut stream, "{nonsense").await;
        let response: ControlResponse = serde_json::from_str(&reply).unwrap();
        assert!(!response.ok);
        assert!(response.message.contains("invalid JSON"));

        // The connection stays usable.
        let reply = send_line(&mut stream, r#"{"type": "get_settings"}"#).await;
        let response: ControlResponse = serde_json::from_str(&reply).unwrap();
        assert!(response.ok);
    }

    #[tokio::test]
    async fn watch_streams_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let (_handle, _cmd_rx, mut sub_rx) = spawn_control_server(&path).unwrap();

        tokio::spawn(async move {
            while let Some(subscriber) = sub_rx.recv().await {
                subscriber
                    .send(UiEvent::OsQuotaExhausted {
                        agent: warden_types::AgentId::new("a1"),
                        activity: warden_types::Activity::Computer,
                    })
                    .await
                    .unwrap();
            }
        });

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.split();
        writer.write_all(b"{\"type\": \"watch\"}\n").await.unwrap();
        let mut lines = BufReader::new(reader).lines();

        let ack: ControlResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(ack.ok);

        let event_line = lines.next_line().await.unwrap().unwrap();
        let event: serde_json::Value = serde_json::from_str(&event_line).unwrap();
        assert_eq!(event["channel"], "osQuotaExhausted");
    }
}
