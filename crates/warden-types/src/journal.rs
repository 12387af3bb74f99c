//! Violation and activity journal entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, ChildId};

/// What kind of violation was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    BlockedProcess,
    ProcessKilled,
    BrowsersBlocked,
    QuotaExhausted,
    BedtimeEnforced,
    ActionFailed,
}

/// One entry in the violations ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub agent: AgentId,
    pub hostname: String,
    #[serde(default)]
    pub process_name: Option<String>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// What kind of activity event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    AgentDiscovered,
    AgentOnline,
    AgentOffline,
    SessionStarted,
    SessionEnded,
    WarningSent,
    LogoutScheduled,
    LogoutCancelled,
    LogoutCompleted,
    SessionLocked,
    FocusApplied,
    FocusCleared,
    AgentLinked,
    AgentUnlinked,
}

/// One entry in the activity ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub agent: AgentId,
    #[serde(default)]
    pub child: Option<ChildId>,
    pub detail: String,
    pub at: DateTime<Utc>,
}
