//! The single persisted state blob.
//!
//! The control plane keeps all durable state in one serde blob written after
//! every state-affecting command. Every field defaults, so blobs written by
//! older versions (or an empty file) load cleanly with documented defaults.
//! Timers are deliberately absent; they are recomputed from fresh verdicts
//! after a reload.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::child::ChildConfig;
use crate::ids::{AgentId, ChildId};
use crate::journal::{ActivityEvent, Violation};
use crate::settings::Settings;

/// Durable control-plane state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    /// Registered agents, keyed by id.
    #[serde(default)]
    pub agents: HashMap<AgentId, Agent>,
    /// Per-agent username → child mappings.
    #[serde(default)]
    pub user_mappings: HashMap<AgentId, HashMap<String, ChildId>>,
    /// Per-agent parent account usernames.
    #[serde(default)]
    pub parent_accounts: HashMap<AgentId, Vec<String>>,
    /// Per-child configuration.
    #[serde(default)]
    pub children: HashMap<ChildId, ChildConfig>,
    #[serde(default)]
    pub settings: Settings,
    /// Violations ring contents, newest first.
    #[serde(default)]
    pub violations: Vec<Violation>,
    /// Activity ring contents, newest first.
    #[serde(default)]
    pub activity_log: Vec<ActivityEvent>,
    /// When the blob was last written.
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}
