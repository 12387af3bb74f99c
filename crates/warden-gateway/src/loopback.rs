//! In-process gateway for deterministic tests and local development.
//!
//! [`LoopbackGateway`] implements [`AgentGateway`] against shared in-memory
//! state; the paired [`LoopbackHandle`] injects events (telemetry, lifecycle)
//! and inspects what the control plane asked the agents to do. With
//! `auto_ack` enabled (the default), every triggered action immediately
//! produces a successful [`GatewayEvent::ActionResponse`], which is how the
//! scenario replays observe kill confirmations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use warden_types::{Agent, AgentId};

use crate::{ActionDeployment, AgentGateway, GatewayError, GatewayEvent, MonitorDeployment};

/// Events buffered before injection blocks. Large enough that replays never
/// hit it.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One `trigger_action` call as seen by the gateway.
#[derive(Debug, Clone)]
pub struct RecordedAction {
    pub agent: AgentId,
    pub action: String,
    pub args: serde_json::Value,
}

/// One deployment call as seen by the gateway.
#[derive(Debug, Clone)]
pub enum RecordedDeployment {
    Monitor(MonitorDeployment),
    MonitorUpdate { monitor_id: String, interval_ms: u64 },
    MonitorRemove { monitor_id: String },
    Action(ActionDeployment),
}

struct LoopbackInner {
    agents: Mutex<Vec<Agent>>,
    deployments: Mutex<HashMap<AgentId, Vec<RecordedDeployment>>>,
    actions: Mutex<Vec<RecordedAction>>,
    /// Agents that refuse all operations, for failure-path tests.
    unreachable: Mutex<Vec<AgentId>>,
    event_tx: mpsc::Sender<GatewayEvent>,
    auto_ack: AtomicBool,
}

/// The test/developer side of the loopback pair.
#[derive(Clone)]
pub struct LoopbackHandle {
    inner: Arc<LoopbackInner>,
}

/// The control-plane side of the loopback pair.
pub struct LoopbackGateway {
    inner: Arc<LoopbackInner>,
}

/// Create a connected loopback pair plus the event stream the supervisor
/// consumes.
pub fn loopback() -> (LoopbackGateway, LoopbackHandle, mpsc::Receiver<GatewayEvent>) {
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let inner = Arc::new(LoopbackInner {
        agents: Mutex::new(Vec::new()),
        deployments: Mutex::new(HashMap::new()),
        actions: Mutex::new(Vec::new()),
        unreachable: Mutex::new(Vec::new()),
        event_tx,
        auto_ack: AtomicBool::new(true),
    });
    (
        LoopbackGateway { inner: inner.clone() },
        LoopbackHandle { inner },
        event_rx,
    )
}

impl LoopbackHandle {
    /// Register an agent so `list_agents` returns it.
    pub fn add_agent(&self, agent: Agent) {
        self.inner
            .agents
            .lock()
            .expect("agents lock poisoned")
            .push(agent);
    }

    /// Inject an event into the stream, as the hub would.
    pub async fn push(&self, event: GatewayEvent) {
        self.inner
            .event_tx
            .send(event)
            .await
            .expect("loopback event channel closed");
    }

    /// Inject telemetry for an agent.
    pub async fn push_telemetry(
        &self,
        agent: &AgentId,
        monitor: &str,
        payload: serde_json::Value,
    ) {
        self.push(GatewayEvent::Telemetry {
            agent: agent.clone(),
            monitor: monitor.to_string(),
            payload,
        })
        .await;
    }

    /// Whether triggered actions auto-acknowledge with success.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.inner.auto_ack.store(enabled, Ordering::Relaxed);
    }

    /// Mark an agent as refusing every operation.
    pub fn set_unreachable(&self, agent: &AgentId) {
        self.inner
            .unreachable
            .lock()
            .expect("unreachable lock poisoned")
            .push(agent.clone());
    }

    /// All actions triggered so far, in order.
    pub fn actions(&self) -> Vec<RecordedAction> {
        self.inner
            .actions
            .lock()
            .expect("actions lock poisoned")
            .clone()
    }

    /// Drop the recorded actions (between scenario phases).
    pub fn clear_actions(&self) {
        self.inner
            .actions
            .lock()
            .expect("actions lock poisoned")
            .clear();
    }

    /// Deployments recorded for one agent.
    pub fn deployments(&self, agent: &AgentId) -> Vec<RecordedDeployment> {
        self.inner
            .deployments
            .lock()
            .expect("deployments lock poisoned")
            .get(agent)
            .cloned()
            .unwrap_or_default()
    }
}

impl LoopbackInner {
    fn refuse_if_unreachable(&self, agent: &AgentId) -> Result<(), GatewayError> {
        let unreachable = self.unreachable.lock().expect("unreachable lock poisoned");
        if unreachable.contains(agent) {
            return Err(GatewayError::AgentUnavailable(
                agent.clone(),
                "marked unreachable".into(),
            ));
        }
        Ok(())
    }

    fn record(&self, agent: &AgentId, deployment: RecordedDeployment) {
        self.deployments
            .lock()
            .expect("deployments lock poisoned")
            .entry(agent.clone())
            .or_default()
            .push(deployment);
    }
}

#[async_trait::async_trait]
impl AgentGateway for LoopbackGateway {
    async fn list_agents(&self) -> Result<Vec<Agent>, GatewayError> {
        Ok(self
            .inner
            .agents
            .lock()
            .expect("agents lock poisoned")
            .clone())
    }

    async fn deploy_monitor(
        &self,
        agent: &AgentId,
        deployment: MonitorDeployment,
    ) -> Result<(), GatewayError> {
        self.inner.refuse_if_unreachable(agent)?;
        self.inner.record(agent, RecordedDeployment::Monitor(deployment));
        Ok(())
    }

    async fn update_monitor(
        &self,
        agent: &AgentId,
        monitor_id: &str,
        interval_ms: u64,
    ) -> Result<(), GatewayError> {
        self.inner.refuse_if_unreachable(agent)?;
        self.inner.record(
            agent,
            RecordedDeployment::MonitorUpdate {
                monitor_id: monitor_id.to_string(),
                interval_ms,
            },
        );
        Ok(())
    }

    async fn remove_monitor(&self, agent: &AgentId, monitor_id: &str) -> Result<(), GatewayError> {
        self.inner.refuse_if_unreachable(agent)?;
        self.inner.record(
            agent,
            RecordedDeployment::MonitorRemove {
                monitor_id: monitor_id.to_string(),
            },
        );
        Ok(())
    }

    async fn deploy_action(
        &self,
        agent: &AgentId,
        deployment: ActionDeployment,
    ) -> Result<(), GatewayError> {
        self.inner.refuse_if_unreachable(agent)?;
        self.inner.record(agent, RecordedDeployment::Action(deployment));
        Ok(())
    }

    async fn trigger_action(
        &self,
        agent: &AgentId,
        action_id: &str,
        args: serde_json::Value,
    ) -> Result<(), GatewayError> {
        self.inner.refuse_if_unreachable(agent)?;
        self.inner
            .actions
            .lock()
            .expect("actions lock poisoned")
            .push(RecordedAction {
                agent: agent.clone(),
                action: action_id.to_string(),
                args: args.clone(),
            });

        if self.inner.auto_ack.load(Ordering::Relaxed) {
            let response = GatewayEvent::ActionResponse {
                agent: agent.clone(),
                action: action_id.to_string(),
                success: true,
                args,
            };
            // try_send: an ack must never deadlock the caller that is
            // draining the same channel.
            let _ = self.inner.event_tx.try_send(response);
        }
        Ok(())
    }
}
