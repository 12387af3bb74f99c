//! Agent registry: records, child bindings, user mappings, parent accounts,
//! and session transitions.
//!
//! Session handling follows a strict sequence: resolve the child for the
//! reported username, detect parental sessions, close the prior session if
//! the username changed (so usage flushes to the old child), then replace
//! the session record atomically.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use warden_types::{Agent, AgentId, ChildId, Session, SessionPayload};

/// A session telemetry observation, resolved against the registry.
#[derive(Debug, Clone)]
pub struct SessionTransition {
    /// The prior session and its bound child, when the username changed.
    /// The accountant must flush usage for this pair before anything else.
    pub ended: Option<(Session, Option<ChildId>)>,
    /// The now-current session.
    pub session: Session,
    /// The child the current username maps to.
    pub child: Option<ChildId>,
    /// Whether anything actually changed (new username or first session).
    pub changed: bool,
}

/// All registered agents and their account bookkeeping.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Agent>,
    user_mappings: HashMap<AgentId, HashMap<String, ChildId>>,
    parent_accounts: HashMap<AgentId, Vec<String>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts.
    pub fn restore(
        agents: HashMap<AgentId, Agent>,
        user_mappings: HashMap<AgentId, HashMap<String, ChildId>>,
        parent_accounts: HashMap<AgentId, Vec<String>>,
    ) -> Self {
        Self {
            agents,
            user_mappings,
            parent_accounts,
        }
    }

    /// Hand back the persisted parts (cloned snapshot).
    pub fn to_parts(
        &self,
    ) -> (
        HashMap<AgentId, Agent>,
        HashMap<AgentId, HashMap<String, ChildId>>,
        HashMap<AgentId, Vec<String>>,
    ) {
        (
            self.agents.clone(),
            self.user_mappings.clone(),
            self.parent_accounts.clone(),
        )
    }

    /// Insert a newly discovered agent, or refresh hostname/platform and
    /// reachability on rediscovery. The child binding survives reconnects.
    pub fn upsert_discovered(&mut self, incoming: Agent) -> &mut Agent {
        match self.agents.entry(incoming.id.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let agent = entry.into_mut();
                agent.hostname = incoming.hostname;
                agent.platform = incoming.platform;
                agent.online = true;
                agent.last_seen = incoming.last_seen;
                agent
            }
            std::collections::hash_map::Entry::Vacant(entry) => entry.insert(incoming),
        }
    }

    pub fn get(&self, agent: &AgentId) -> Option<&Agent> {
        self.agents.get(agent)
    }

    pub fn get_mut(&mut self, agent: &AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(agent)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.values_mut()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents enforcing for a child: bound at the agent level, or reaching
    /// the child through any username mapping. This is the converse of
    /// [`resolve_child`](Self::resolve_child); the two must stay in sync so
    /// a quota state change reaches every agent whose sessions can resolve
    /// to the child.
    pub fn bound_to(&self, child: &ChildId) -> Vec<AgentId> {
        self.agents
            .values()
            .filter(|a| {
                a.child_id.as_ref() == Some(child)
                    || self
                        .user_mappings
                        .get(&a.id)
                        .is_some_and(|mappings| mappings.values().any(|c| c == child))
            })
            .map(|a| a.id.clone())
            .collect()
    }

    /// Number of distinct children reachable from any agent, through the
    /// agent-level binding or a username mapping.
    pub fn monitored_children(&self) -> usize {
        let mut children: BTreeSet<&ChildId> = self
            .agents
            .values()
            .filter_map(|a| a.child_id.as_ref())
            .collect();
        for mappings in self.user_mappings.values() {
            children.extend(mappings.values());
        }
        children.len()
    }

    /// Bind an agent to a child. Without an existing mapping for the
    /// agent's current username, that username is mapped implicitly.
    pub fn bind(&mut self, agent_id: &AgentId, child: ChildId) -> Result<(), String> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| format!("unknown agent: {agent_id}"))?;
        agent.child_id = Some(child.clone());

        if let Some(session) = &agent.current_session {
            let mappings = self.user_mappings.entry(agent_id.clone()).or_default();
            mappings
                .entry(session.username.clone())
                .or_insert_with(|| child.clone());
        }
        Ok(())
    }

    /// Remove the child binding.
    pub fn unbind(&mut self, agent_id: &AgentId) -> Result<Option<ChildId>, String> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| format!("unknown agent: {agent_id}"))?;
        Ok(agent.child_id.take())
    }

    /// Map a username to a child on one agent; `None` clears the mapping.
    pub fn set_mapping(&mut self, agent_id: &AgentId, username: &str, child: Option<ChildId>) {
        let mappings = self.user_mappings.entry(agent_id.clone()).or_default();
        match child {
            Some(child) => {
                mappings.insert(username.to_string(), child);
            }
            None => {
                mappings.remove(username);
            }
        }
    }

    /// Replace the parent-account list for one agent.
    pub fn set_parents(&mut self, agent_id: &AgentId, usernames: Vec<String>) {
        self.parent_accounts.insert(agent_id.clone(), usernames);
    }

    pub fn is_parent(&self, agent_id: &AgentId, username: &str) -> bool {
        self.parent_accounts
            .get(agent_id)
            .is_some_and(|parents| parents.iter().any(|p| p == username))
    }

    /// The child a username on an agent maps to: the explicit mapping
    /// first, falling back to the agent-level binding (the single-child
    /// default for usernames nobody mapped). The converse direction is
    /// [`bound_to`](Self::bound_to). On a shared machine, map every
    /// monitored username explicitly; the fallback exists so a freshly
    /// linked agent enforces before any mapping is configured.
    pub fn resolve_child(&self, agent_id: &AgentId, username: &str) -> Option<ChildId> {
        if let Some(child) = self
            .user_mappings
            .get(agent_id)
            .and_then(|m| m.get(username))
        {
            return Some(child.clone());
        }
        self.agents
            .get(agent_id)
            .and_then(|a| a.child_id.clone())
    }

    /// Apply session telemetry. Returns `None` for unknown agents.
    pub fn observe_session(
        &mut self,
        agent_id: &AgentId,
        payload: &SessionPayload,
        now: DateTime<Utc>,
    ) -> Option<SessionTransition> {
        let parental = self.is_parent(agent_id, &payload.username);
        let child = if parental {
            None
        } else {
            self.resolve_child(agent_id, &payload.username)
        };

        // Resolve the prior session's child before borrowing mutably.
        let prior = self
            .agents
            .get(agent_id)?
            .current_session
            .clone();
        let ended = match &prior {
            Some(prev) if prev.username != payload.username => {
                let prev_child = if prev.parental {
                    None
                } else {
                    self.resolve_child(agent_id, &prev.username)
                };
                debug!(
                    agent = %agent_id,
                    from = prev.username,
                    to = payload.username,
                    "session username changed"
                );
                Some((prev.clone(), prev_child))
            }
            _ => None,
        };

        let session = Session {
            username: payload.username.clone(),
            session_id: payload.session_id.clone(),
            login_at: payload.login_time,
            idle_ms: payload.idle_time,
            parental,
        };

        let changed = ended.is_some() || prior.is_none();
        let agent = self.agents.get_mut(agent_id)?;
        agent.current_session = Some(session.clone());
        agent.last_seen = now;
        agent.online = true;

        Some(SessionTransition {
            ended,
            session,
            child,
            changed,
        })
    }
}
