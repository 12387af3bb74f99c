//! Agent registry records and session telemetry shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::child::FocusProfile;
use crate::ids::{AgentId, ChildId};

/// Platform tag reported by an agent. The set is closed; scripts are
/// selected from the deployment manifest by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Win32,
    Darwin,
    Linux,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Win32 => write!(f, "win32"),
            Platform::Darwin => write!(f, "darwin"),
            Platform::Linux => write!(f, "linux"),
        }
    }
}

/// Kind of script deployed to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    Monitor,
    Action,
}

/// One entry in an agent's deployed-scripts manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedScript {
    /// Monitor or action id (`"session"`, `"process"`, `"warn"`, ...).
    pub id: String,
    pub kind: ScriptKind,
    /// Reporting interval for monitors; `None` for actions.
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// The current OS session on an agent, as tracked by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    /// Platform-specific session identifier, opaque to the core.
    #[serde(default)]
    pub session_id: Option<String>,
    /// When the OS session began, if the agent reports it.
    #[serde(default)]
    pub login_at: Option<DateTime<Utc>>,
    /// Milliseconds since last user input at the time of the report.
    pub idle_ms: u64,
    /// Whether this username is on the agent's parent-account list.
    /// Parental sessions are tracked but never produce intents.
    #[serde(default)]
    pub parental: bool,
}

impl Session {
    /// Whether the session counts as idle under the given threshold.
    pub fn is_idle(&self, idle_threshold_ms: u64) -> bool {
        self.idle_ms >= idle_threshold_ms
    }
}

/// A registered agent: one installation on one child's computer.
///
/// `current_session` and `child_id` are explicitly optional; an agent may be
/// discovered and deployed before anyone logs in or before a parent links it
/// to a child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub hostname: String,
    pub platform: Platform,
    /// Reachability: set false when the telemetry gap exceeds three report
    /// intervals, true again on the next event.
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    /// Scripts currently deployed to this agent.
    #[serde(default)]
    pub deployed: Vec<DeployedScript>,
    /// Child this agent is bound to; `None` means telemetry is tracked for
    /// reachability only and produces no intents.
    #[serde(default)]
    pub child_id: Option<ChildId>,
    /// Disabled agents keep their binding but are never evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub current_session: Option<Session>,
    /// The focus profile currently applied, if any.
    #[serde(default)]
    pub focus_active: Option<FocusProfile>,
}

fn default_enabled() -> bool {
    true
}

impl Agent {
    /// A freshly discovered agent: online, unbound, nothing deployed.
    pub fn discovered(
        id: AgentId,
        hostname: impl Into<String>,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            platform,
            online: true,
            last_seen: now,
            deployed: Vec::new(),
            child_id: None,
            enabled: true,
            current_session: None,
            focus_active: None,
        }
    }
}

/// Wire payload produced by the `session` monitor script.
///
/// Field names match the script contract; unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub platform: Platform,
    pub username: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub login_time: Option<DateTime<Utc>>,
    /// Milliseconds since last input.
    #[serde(default)]
    pub idle_time: u64,
    /// The script's own idle verdict; the core re-derives from `idle_time`
    /// and its configured threshold.
    #[serde(default)]
    pub is_idle: bool,
    #[serde(default)]
    pub uptime: u64,
    /// Whether the reported user is a system/service account.
    #[serde(default)]
    pub system_user: bool,
}
