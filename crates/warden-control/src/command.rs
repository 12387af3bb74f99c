//! Control protocol types.
//!
//! Commands operate on the fleet as a whole (status, settings) or on a
//! single agent (link, logout, focus). Responses carry an `(ok, message)`
//! pair plus optional structured data; the error kinds of the core are
//! flattened into `ok = false` at this boundary, which is the transport
//! contract the UI expects.

use serde::{Deserialize, Serialize};

use warden_types::{
    Agent, AgentId, ChildConfigPatch, ChildId, Session, SettingsPatch,
};

/// A command sent to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Fleet health: agent counts, monitored children, recent violations.
    GetStatus,
    /// List all registered agents.
    GetAgents,
    /// Bind an agent to a child. Without an explicit user mapping, the
    /// agent's current username is mapped to the child implicitly.
    LinkAgent { agent: AgentId, child: ChildId },
    /// Remove an agent's child binding and cancel any pending logout.
    UnlinkAgent { agent: AgentId },
    /// Map a username on an agent to a child; `child: null` clears.
    SetUserMapping {
        agent: AgentId,
        username: String,
        #[serde(default)]
        child: Option<ChildId>,
    },
    /// Replace the parent-account username list for an agent.
    SetParentAccounts {
        agent: AgentId,
        usernames: Vec<String>,
    },
    /// Partially update a child's configuration.
    UpdateChildSettings {
        child: ChildId,
        #[serde(default)]
        patch: ChildConfigPatch,
    },
    /// Newest-first violations, up to `limit` (default all).
    GetViolations {
        #[serde(default)]
        limit: Option<usize>,
    },
    ClearViolations,
    /// Newest-first activity log, up to `limit`.
    GetActivityLog {
        #[serde(default)]
        limit: Option<usize>,
    },
    GetSettings,
    /// Partially update fleet settings. Changing the monitor interval
    /// redeploys every agent's monitors.
    UpdateSettings {
        #[serde(default)]
        patch: SettingsPatch,
    },
    /// Enqueue a logout with the default grace period.
    ForceLogout { agent: AgentId },
    /// Lock the agent's session immediately.
    LockSession { agent: AgentId },
    /// Apply or clear focus mode. Requires the child to have a focus
    /// profile configured.
    TriggerFocusMode {
        agent: AgentId,
        enabled: bool,
        child: ChildId,
    },
    /// Switch this connection into a UI event stream.
    Watch,
}

/// Response to a control command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Summary of one agent, returned by `get_agents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub hostname: String,
    pub platform: String,
    pub online: bool,
    #[serde(default)]
    pub child: Option<ChildId>,
    pub enabled: bool,
    #[serde(default)]
    pub current_session: Option<Session>,
    #[serde(default)]
    pub focus_active: bool,
}

impl From<&Agent> for AgentSummary {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            hostname: agent.hostname.clone(),
            platform: agent.platform.to_string(),
            online: agent.online,
            child: agent.child_id.clone(),
            enabled: agent.enabled,
            current_session: agent.current_session.clone(),
            focus_active: agent.focus_active.is_some(),
        }
    }
}

/// Fleet summary, returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummary {
    pub agent_count: usize,
    pub active_agents: usize,
    pub monitored_children: usize,
    pub recent_violations: Vec<warden_types::Violation>,
    pub settings: warden_types::Settings,
    #[serde(default)]
    pub last_sync: Option<chrono::DateTime<chrono::Utc>>,
}
