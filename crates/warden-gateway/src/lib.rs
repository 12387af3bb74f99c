//! Agent transport layer: the contract between the control plane and the
//! remote agent subsystem.
//!
//! The [`AgentGateway`] trait covers the full deployment and action surface;
//! telemetry and lifecycle notifications arrive as a [`GatewayEvent`] stream
//! on a tokio mpsc channel. Two implementations ship:
//!
//! - [`SocketGateway`]: NDJSON over a Unix domain socket to the external
//!   agent-hub service (the production transport).
//! - [`LoopbackGateway`]: an in-process gateway backed by channels, used by
//!   the deterministic scenario tests and local development.
//!
//! Action responses are not returned from [`AgentGateway::trigger_action`];
//! they arrive as [`GatewayEvent::ActionResponse`] on the event stream, so
//! the dispatcher observes its own actions the same way it observes
//! telemetry.

pub mod loopback;
pub mod scripts;
pub mod socket;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use warden_types::{Agent, AgentId, Platform};

pub use loopback::{loopback, LoopbackGateway, LoopbackHandle};
pub use socket::SocketGateway;

/// Monitor id producing [`warden_types::agent::SessionPayload`] telemetry.
pub const MONITOR_SESSION: &str = "session";
/// Monitor id producing [`warden_types::process::ProcessPayload`] telemetry.
pub const MONITOR_PROCESS: &str = "process";

/// Action id: show a notification on the agent.
pub const ACTION_WARN: &str = "warn";
/// Action id: kill a process by pid.
pub const ACTION_KILL: &str = "kill";
/// Action id: lock the current session.
pub const ACTION_LOCK: &str = "lock";
/// Action id: log the current user out.
pub const ACTION_LOGOUT: &str = "logout";

/// Errors from gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The gateway service itself cannot be reached.
    #[error("gateway unreachable: {0}")]
    Unreachable(String),

    /// The gateway is up but the target agent rejected or timed out.
    #[error("agent {0} unavailable: {1}")]
    AgentUnavailable(AgentId, String),

    /// No reply within the request deadline.
    #[error("gateway request timed out")]
    Timeout,

    /// Malformed frame or unexpected response shape.
    #[error("gateway protocol error: {0}")]
    Protocol(String),
}

/// A monitor deployment request. The blob is already selected for the
/// target agent's platform; `platforms` records which platforms it
/// supports. Deployment is idempotent per `monitor_id`: re-deploying with a
/// new interval updates the interval in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorDeployment {
    pub monitor_id: String,
    pub script_blob: String,
    pub interval_ms: u64,
    pub platforms: Vec<Platform>,
}

/// An action deployment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDeployment {
    pub action_id: String,
    pub script_blob: String,
    pub platforms: Vec<Platform>,
}

/// Events pushed from the agent subsystem into the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A new agent registered with the hub.
    Discovered { agent: Agent },
    /// One monitor report. The payload is opaque to the gateway; the
    /// supervisor parses it according to the monitor id.
    Telemetry {
        agent: AgentId,
        monitor: String,
        payload: serde_json::Value,
    },
    /// Result of a previously triggered action. `args` echoes the action
    /// arguments plus any script-reported fields.
    ActionResponse {
        agent: AgentId,
        action: String,
        success: bool,
        #[serde(default)]
        args: serde_json::Value,
    },
    Online { agent: AgentId },
    Offline { agent: AgentId },
}

impl GatewayEvent {
    /// The agent this event concerns.
    pub fn agent_id(&self) -> &AgentId {
        match self {
            GatewayEvent::Discovered { agent } => &agent.id,
            GatewayEvent::Telemetry { agent, .. }
            | GatewayEvent::ActionResponse { agent, .. }
            | GatewayEvent::Online { agent }
            | GatewayEvent::Offline { agent } => agent,
        }
    }
}

/// Bi-directional transport to the remote agent subsystem.
///
/// All operations are idempotent at the gateway level; retry policy is the
/// caller's concern (the supervisor retries on the natural telemetry
/// cadence, never in a loop).
#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// All agents the hub currently knows, reachable or not.
    async fn list_agents(&self) -> Result<Vec<Agent>, GatewayError>;

    /// Install or update a monitor script on an agent.
    async fn deploy_monitor(
        &self,
        agent: &AgentId,
        deployment: MonitorDeployment,
    ) -> Result<(), GatewayError>;

    /// Change the reporting interval of an already-deployed monitor.
    async fn update_monitor(
        &self,
        agent: &AgentId,
        monitor_id: &str,
        interval_ms: u64,
    ) -> Result<(), GatewayError>;

    /// Remove a deployed monitor.
    async fn remove_monitor(&self, agent: &AgentId, monitor_id: &str) -> Result<(), GatewayError>;

    /// Install an action script on an agent.
    async fn deploy_action(
        &self,
        agent: &AgentId,
        deployment: ActionDeployment,
    ) -> Result<(), GatewayError>;

    /// Invoke a deployed action. The response arrives later as
    /// [`GatewayEvent::ActionResponse`].
    async fn trigger_action(
        &self,
        agent: &AgentId,
        action_id: &str,
        args: serde_json::Value,
    ) -> Result<(), GatewayError>;
}
