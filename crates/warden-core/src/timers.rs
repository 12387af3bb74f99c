//! Per-agent timer table.
//!
//! Replaces scattered "find the timer, clear it, start another" logic with
//! a single deadline table the supervisor polls on its tick. Each agent
//! holds at most one logout timer and one set of pre-logout warning timers;
//! arming is cancel-then-arm and cancellation is idempotent.
//!
//! Logout timers have two stages. A *depletion* timer is a forecast armed
//! from the latest remaining-time estimate; firing it re-enters the planner,
//! which issues the real logout. A *grace* timer is armed enforcement;
//! firing it triggers the agent's `logout` action. Grace always supersedes
//! depletion; among grace timers the earlier deadline wins.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use warden_types::AgentId;

/// Stage of a pending logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutStage {
    /// Forecast: quota will run out at the deadline.
    Depletion,
    /// Enforcement: the warn fired, the logout action runs at the deadline.
    Grace,
}

#[derive(Debug, Clone)]
pub struct LogoutTimer {
    pub deadline: DateTime<Utc>,
    pub reason: String,
    pub stage: LogoutStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningTimer {
    pub deadline: DateTime<Utc>,
    /// Ladder threshold in minutes.
    pub threshold: u32,
}

#[derive(Debug, Default)]
struct AgentTimers {
    logout: Option<LogoutTimer>,
    warnings: Vec<WarningTimer>,
}

/// A timer that came due.
#[derive(Debug, Clone)]
pub enum FiredTimer {
    Logout { reason: String, stage: LogoutStage },
    Warning { threshold: u32 },
}

/// Outcome of arming a grace logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Armed {
    /// No prior grace timer; this one is now pending.
    Scheduled,
    /// A prior grace timer had a later deadline and was replaced.
    Replaced,
    /// A prior grace timer with an earlier deadline was kept.
    KeptEarlier,
}

/// All pending timers, keyed by agent.
#[derive(Debug, Default)]
pub struct TimerTable {
    agents: HashMap<AgentId, AgentTimers>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the enforcement logout. At most one logout timer exists per
    /// agent afterwards; an earlier pending grace deadline is kept.
    pub fn schedule_logout(
        &mut self,
        agent: &AgentId,
        deadline: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Armed {
        let slot = &mut self.agents.entry(agent.clone()).or_default().logout;
        match slot {
            Some(existing) if existing.stage == LogoutStage::Grace => {
                if existing.deadline <= deadline {
                    return Armed::KeptEarlier;
                }
                *slot = Some(LogoutTimer {
                    deadline,
                    reason: reason.into(),
                    stage: LogoutStage::Grace,
                });
                Armed::Replaced
            }
            _ => {
                *slot = Some(LogoutTimer {
                    deadline,
                    reason: reason.into(),
                    stage: LogoutStage::Grace,
                });
                Armed::Scheduled
            }
        }
    }

    /// Arm (or re-arm) the depletion forecast. Never displaces a pending
    /// grace logout.
    pub fn arm_depletion(
        &mut self,
        agent: &AgentId,
        deadline: DateTime<Utc>,
        reason: impl Into<String>,
    ) {
        let slot = &mut self.agents.entry(agent.clone()).or_default().logout;
        if matches!(slot, Some(t) if t.stage == LogoutStage::Grace) {
            return;
        }
        *slot = Some(LogoutTimer {
            deadline,
            reason: reason.into(),
            stage: LogoutStage::Depletion,
        });
    }

    /// Replace the warning timer set from the latest remaining-time
    /// estimate.
    pub fn set_warnings(&mut self, agent: &AgentId, warnings: Vec<WarningTimer>) {
        self.agents.entry(agent.clone()).or_default().warnings = warnings;
    }

    /// Cancel the pending logout, if any. Returns its reason. Idempotent.
    pub fn cancel_logout(&mut self, agent: &AgentId) -> Option<String> {
        self.agents
            .get_mut(agent)
            .and_then(|t| t.logout.take())
            .map(|t| t.reason)
    }

    /// Cancel everything for an agent. Idempotent.
    pub fn cancel_agent(&mut self, agent: &AgentId) {
        self.agents.remove(agent);
    }

    /// Cancel everything for every agent (shutdown).
    pub fn cancel_all(&mut self) {
        self.agents.clear();
    }

    /// Whether a logout timer is pending for the agent.
    pub fn has_logout(&self, agent: &AgentId) -> bool {
        self.agents
            .get(agent)
            .is_some_and(|t| t.logout.is_some())
    }

    /// Number of pending logout timers for the agent (0 or 1 by
    /// construction; exposed so tests can assert the invariant).
    pub fn logout_count(&self, agent: &AgentId) -> usize {
        usize::from(self.has_logout(agent))
    }

    /// The pending logout deadline, if any.
    pub fn logout_deadline(&self, agent: &AgentId) -> Option<DateTime<Utc>> {
        self.agents
            .get(agent)
            .and_then(|t| t.logout.as_ref())
            .map(|t| t.deadline)
    }

    /// Remove and return every timer due at `now`, logout first per agent.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<(AgentId, FiredTimer)> {
        let mut fired = Vec::new();
        for (agent, timers) in &mut self.agents {
            let logout_due = timers.logout.as_ref().is_some_and(|t| t.deadline <= now);
            if logout_due {
                if let Some(timer) = timers.logout.take() {
                    fired.push((
                        agent.clone(),
                        FiredTimer::Logout {
                            reason: timer.reason,
                            stage: timer.stage,
                        },
                    ));
                }
            }
            let mut due_warnings: Vec<WarningTimer> = Vec::new();
            timers.warnings.retain(|w| {
                if w.deadline <= now {
                    due_warnings.push(*w);
                    false
                } else {
                    true
                }
            });
            for warning in due_warnings {
                fired.push((
                    agent.clone(),
                    FiredTimer::Warning {
                        threshold: warning.threshold,
                    },
                ));
            }
        }
        self.agents
            .retain(|_, t| t.logout.is_some() || !t.warnings.is_empty());
        fired
    }
}
