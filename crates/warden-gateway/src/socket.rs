//! NDJSON-over-Unix-socket gateway client.
//!
//! Connects to the external agent-hub service. Requests carry a uuid
//! `request_id` and get exactly one response frame; unsolicited frames are
//! [`GatewayEvent`]s and are forwarded to the event channel. One background
//! task owns the read half and routes frames; writers share the write half
//! behind a mutex.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use warden_types::{Agent, AgentId};

use crate::{ActionDeployment, AgentGateway, GatewayError, GatewayEvent, MonitorDeployment};

/// Default per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered events before the hub connection applies backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A request frame sent to the hub.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestFrame<'a> {
    ListAgents {
        request_id: Uuid,
    },
    DeployMonitor {
        request_id: Uuid,
        agent: &'a AgentId,
        #[serde(flatten)]
        deployment: &'a MonitorDeployment,
    },
    UpdateMonitor {
        request_id: Uuid,
        agent: &'a AgentId,
        monitor_id: &'a str,
        interval_ms: u64,
    },
    RemoveMonitor {
        request_id: Uuid,
        agent: &'a AgentId,
        monitor_id: &'a str,
    },
    DeployAction {
        request_id: Uuid,
        agent: &'a AgentId,
        #[serde(flatten)]
        deployment: &'a ActionDeployment,
    },
    TriggerAction {
        request_id: Uuid,
        agent: &'a AgentId,
        action_id: &'a str,
        args: &'a serde_json::Value,
    },
}

/// A response frame from the hub.
#[derive(Debug, Clone, Deserialize)]
struct ResponseFrame {
    request_id: Uuid,
    ok: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Any inbound line: either a correlated response or an event.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundFrame {
    Response(ResponseFrame),
    Event(GatewayEvent),
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ResponseFrame>>>>;

/// Gateway client over a Unix domain socket.
pub struct SocketGateway {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    timeout: Duration,
}

impl SocketGateway {
    /// Connect to the hub socket. Returns the gateway handle and the event
    /// stream. Failure here is fatal for the daemon: without the hub there
    /// is nothing to supervise.
    pub async fn connect(
        path: &Path,
    ) -> Result<(Self, mpsc::Receiver<GatewayEvent>), GatewayError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| GatewayError::Unreachable(format!("{}: {e}", path.display())))?;
        let (read_half, write_half) = stream.into_split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(read_pump(read_half, pending.clone(), event_tx));

        Ok((
            Self {
                writer: tokio::sync::Mutex::new(write_half),
                pending,
                timeout: REQUEST_TIMEOUT,
            },
            event_rx,
        ))
    }

    /// Send one frame and await its correlated response.
    async fn request(&self, request_id: Uuid, frame: RequestFrame<'_>) -> Result<ResponseFrame, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(request_id, tx);

        let mut line = serde_json::to_string(&frame)
            .map_err(|e| GatewayError::Protocol(format!("encode: {e}")))?;
        line.push('\n');

        {
            let mut writer = self.writer.lock().await;
            writer
                .write_all(line.as_bytes())
                .await
                .map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(GatewayError::Unreachable("hub connection closed".into()));
            }
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending map lock poisoned")
                    .remove(&request_id);
                return Err(GatewayError::Timeout);
            }
        };

        Ok(response)
    }

    /// Map a response into a per-agent result.
    fn check(agent: &AgentId, response: ResponseFrame) -> Result<ResponseFrame, GatewayError> {
        if response.ok {
            Ok(response)
        } else {
            Err(GatewayError::AgentUnavailable(
                agent.clone(),
                response.message,
            ))
        }
    }
}

/// Read NDJSON lines and route them: responses to their waiter, events to
/// the supervisor channel. Exits when the hub closes the connection.
async fn read_pump(
    read_half: OwnedReadHalf,
    pending: PendingMap,
    event_tx: mpsc::Sender<GatewayEvent>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("gateway hub closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "gateway read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<InboundFrame>(&line) {
            Ok(InboundFrame::Response(response)) => {
                let waiter = pending
                    .lock()
                    .expect("pending map lock poisoned")
                    .remove(&response.request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        debug!(request_id = %response.request_id, "response with no waiter (timed out?)");
                    }
                }
            }
            Ok(InboundFrame::Event(event)) => {
                if event_tx.send(event).await.is_err() {
                    debug!("event channel closed, stopping gateway read pump");
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "unparseable gateway frame, skipping");
            }
        }
    }

    // Fail any requests still waiting; their oneshot senders drop here.
    pending.lock().expect("pending map lock poisoned").clear();
}

#[async_trait::async_trait]
impl AgentGateway for SocketGateway {
    async fn list_agents(&self) -> Result<Vec<Agent>, GatewayError> {
        let request_id = Uuid::new_v4();
        let response = self
            .request(request_id, RequestFrame::ListAgents { request_id })
            .await?;
        if !response.ok {
            return Err(GatewayError::Protocol(response.message));
        }
        let data = response
            .data
            .ok_or_else(|| GatewayError::Protocol("list_agents response missing data".into()))?;
        serde_json::from_value(data).map_err(|e| GatewayError::Protocol(format!("agent list: {e}")))
    }

    async fn deploy_monitor(
        &self,
        agent: &AgentId,
        deployment: MonitorDeployment,
    ) -> Result<(), GatewayError> {
        let request_id = Uuid::new_v4();
        let response = self
            .request(
                request_id,
                RequestFrame::DeployMonitor {
                    request_id,
                    agent,
                    deployment: &deployment,
                },
            )
            .await?;
        Self::check(agent, response).map(|_| ())
    }

    async fn update_monitor(
        &self,
        agent: &AgentId,
        monitor_id: &str,
        interval_ms: u64,
    ) -> Result<(), GatewayError> {
        let request_id = Uuid::new_v4();
        let response = self
            .request(
                request_id,
                RequestFrame::UpdateMonitor {
                    request_id,
                    agent,
                    monitor_id,
                    interval_ms,
                },
            )
            .await?;
        Self::check(agent, response).map(|_| ())
    }

    async fn remove_monitor(&self, agent: &AgentId, monitor_id: &str) -> Result<(), GatewayError> {
        let request_id = Uuid::new_v4();
        let response = self
            .request(
                request_id,
                RequestFrame::RemoveMonitor {
                    request_id,
                    agent,
                    monitor_id,
                },
            )
            .await?;
        Self::check(agent, response).map(|_| ())
    }

    async fn deploy_action(
        &self,
        agent: &AgentId,
        deployment: ActionDeployment,
    ) -> Result<(), GatewayError> {
        let request_id = Uuid::new_v4();
        let response = self
            .request(
                request_id,
                RequestFrame::DeployAction {
                    request_id,
                    agent,
                    deployment: &deployment,
                },
            )
            .await?;
        Self::check(agent, response).map(|_| ())
    }

    async fn trigger_action(
        &self,
        agent: &AgentId,
        action_id: &str,
        args: serde_json::Value,
    ) -> Result<(), GatewayError> {
        let request_id = Uuid::new_v4();
        let response = self
            .request(
                request_id,
                RequestFrame::TriggerAction {
                    request_id,
                    agent,
                    action_id,
                    args: &args,
                },
            )
            .await?;
        Self::check(agent, response).map(|_| ())
    }
}
