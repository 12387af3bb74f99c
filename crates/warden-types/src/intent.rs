//! Enforcement intents: typed commands from the planner to the dispatcher.

use serde::{Deserialize, Serialize};

use crate::child::FocusProfile;
use crate::ids::AgentId;
use crate::verdict::Activity;

/// How prominently a warning should be surfaced on the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Normal,
    Critical,
}

/// What a warning is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSubject {
    Computer,
    Internet,
    Bedtime,
}

impl From<Activity> for WarningSubject {
    fn from(activity: Activity) -> Self {
        match activity {
            Activity::Computer => WarningSubject::Computer,
            Activity::Internet => WarningSubject::Internet,
        }
    }
}

/// A typed enforcement decision, produced by the planner and consumed by
/// the dispatcher. Intents describe *what* should happen on an agent;
/// translation into agent actions (and timer arming) is the dispatcher's
/// job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnforcementIntent {
    Warning {
        agent: AgentId,
        subject: WarningSubject,
        minutes_remaining: u32,
        urgency: Urgency,
    },
    BlockProcess {
        agent: AgentId,
        pid: u32,
        name: String,
        reason: String,
    },
    BlockBrowsers {
        agent: AgentId,
    },
    Lock {
        agent: AgentId,
    },
    Logout {
        agent: AgentId,
        reason: String,
        grace_secs: u32,
    },
    FocusApply {
        agent: AgentId,
        profile: FocusProfile,
    },
    FocusClear {
        agent: AgentId,
    },
}

impl EnforcementIntent {
    /// The agent this intent targets.
    pub fn agent(&self) -> &AgentId {
        match self {
            EnforcementIntent::Warning { agent, .. }
            | EnforcementIntent::BlockProcess { agent, .. }
            | EnforcementIntent::BlockBrowsers { agent }
            | EnforcementIntent::Lock { agent }
            | EnforcementIntent::Logout { agent, .. }
            | EnforcementIntent::FocusApply { agent, .. }
            | EnforcementIntent::FocusClear { agent } => agent,
        }
    }

    /// Severity rank for same-tick ordering: Logout > BlockBrowsers >
    /// BlockProcess > Warning, with focus/lock changes in between block and
    /// warning.
    pub fn rank(&self) -> u8 {
        match self {
            EnforcementIntent::Logout { .. } => 5,
            EnforcementIntent::BlockBrowsers { .. } => 4,
            EnforcementIntent::BlockProcess { .. } => 3,
            EnforcementIntent::Lock { .. }
            | EnforcementIntent::FocusApply { .. }
            | EnforcementIntent::FocusClear { .. } => 2,
            EnforcementIntent::Warning { .. } => 1,
        }
    }
}

/// Order intents for one agent within one tick: highest severity first.
pub fn sort_for_dispatch(intents: &mut [EnforcementIntent]) {
    intents.sort_by(|a, b| b.rank().cmp(&a.rank()));
}
