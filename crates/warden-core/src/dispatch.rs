//! Intent-to-action translation.
//!
//! Consumes the planner's deduplicated intent stream and drives the
//! gateway: warnings become `warn` actions, blocks become `kill`s with a
//! re-observation suppression window, logouts become an immediate critical
//! warn plus a grace timer armed through the timer table (at most one per
//! agent). Failed gateway calls are journaled and retried only on the
//! natural telemetry cadence.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use warden_control::UiEvent;
use warden_gateway::{AgentGateway, ACTION_KILL, ACTION_LOCK, ACTION_WARN};
use warden_types::{
    Activity, AgentId, EnforcementIntent, ProcessSnapshot, Settings, Urgency, Violation,
    ViolationKind, WarningSubject,
};

use crate::journal::Journal;
use crate::timers::{Armed, TimerTable};

/// A kill already dispatched for a pid is suppressed on re-observation
/// within this window.
pub const KILL_SUPPRESS_SECS: i64 = 30;

/// What a dispatch round changed, for the supervisor's state machine.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub ui_events: Vec<UiEvent>,
    /// Agents whose logout grace period started this round.
    pub logout_scheduled: Vec<AgentId>,
    /// Agents that received a ladder warning this round.
    pub warned: Vec<AgentId>,
}

/// Stateful intent executor.
#[derive(Debug, Default)]
pub struct Dispatcher {
    /// (agent, pid) -> when a kill was last dispatched.
    recent_kills: HashMap<(AgentId, u32), DateTime<Utc>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one agent's intents for one tick, highest severity first.
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch<G: AgentGateway>(
        &mut self,
        gateway: &G,
        mut intents: Vec<EnforcementIntent>,
        snapshot: Option<&ProcessSnapshot>,
        hostname: &str,
        settings: &Settings,
        timers: &mut TimerTable,
        journal: &mut Journal,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        self.prune(now);
        warden_types::intent::sort_for_dispatch(&mut intents);

        let mut outcome = DispatchOutcome::default();
        for intent in intents {
            match intent {
                EnforcementIntent::Warning {
                    agent,
                    subject,
                    minutes_remaining,
                    urgency,
                } => {
                    self.send_warning(
                        gateway,
                        &agent,
                        subject,
                        minutes_remaining,
                        urgency,
                        journal,
                        now,
                    )
                    .await;
                    outcome.ui_events.push(match subject {
                        WarningSubject::Bedtime => UiEvent::OsBedtimeWarning {
                            agent: agent.clone(),
                            minutes_remaining,
                            urgency,
                        },
                        WarningSubject::Computer => UiEvent::OsQuotaWarning {
                            agent: agent.clone(),
                            activity: Activity::Computer,
                            minutes_remaining,
                            urgency,
                        },
                        WarningSubject::Internet => UiEvent::OsQuotaWarning {
                            agent: agent.clone(),
                            activity: Activity::Internet,
                            minutes_remaining,
                            urgency,
                        },
                    });
                    outcome.warned.push(agent);
                }

                EnforcementIntent::BlockProcess {
                    agent,
                    pid,
                    name,
                    reason,
                } => {
                    if self.suppressed(&agent, pid, now) {
                        debug!(agent = %agent, pid, "kill suppressed (within window)");
                        continue;
                    }
                    self.kill(gateway, &agent, pid, &name, &reason, hostname, settings, journal, now)
                        .await;
                }

                EnforcementIntent::BlockBrowsers { agent } => {
                    let browsers: Vec<(u32, String)> = snapshot
                        .map(|s| {
                            s.browsers
                                .iter()
                                .map(|b| (b.pid, b.name.clone()))
                                .collect()
                        })
                        .unwrap_or_default();
                    for (pid, name) in browsers {
                        if self.suppressed(&agent, pid, now) {
                            continue;
                        }
                        self.kill(
                            gateway,
                            &agent,
                            pid,
                            &name,
                            "internet time is up",
                            hostname,
                            settings,
                            journal,
                            now,
                        )
                        .await;
                    }
                    self.trigger(
                        gateway,
                        &agent,
                        ACTION_WARN,
                        serde_json::json!({
                            "title": "Internet Blocked",
                            "message": "Internet time is used up for today.",
                            "urgency": "critical",
                        }),
                        journal,
                        hostname,
                        now,
                    )
                    .await;
                    journal.record_violation(Violation {
                        kind: ViolationKind::BrowsersBlocked,
                        agent: agent.clone(),
                        hostname: hostname.to_string(),
                        process_name: None,
                        reason: "internet not allowed".into(),
                        at: now,
                    });
                    outcome.ui_events.push(UiEvent::OsQuotaExhausted {
                        agent,
                        activity: Activity::Internet,
                    });
                }

                EnforcementIntent::Lock { agent } => {
                    self.trigger(
                        gateway,
                        &agent,
                        ACTION_LOCK,
                        serde_json::json!({}),
                        journal,
                        hostname,
                        now,
                    )
                    .await;
                    journal.record_activity(warden_types::ActivityEvent {
                        kind: warden_types::ActivityKind::SessionLocked,
                        agent,
                        child: None,
                        detail: "session locked by parent".into(),
                        at: now,
                    });
                }

                EnforcementIntent::Logout {
                    agent,
                    reason,
                    grace_secs,
                } => {
                    let deadline = now + Duration::seconds(i64::from(grace_secs));
                    let armed = timers.schedule_logout(&agent, deadline, reason.clone());
                    if armed == Armed::KeptEarlier {
                        // The pending logout already covers this; no second
                        // warn either.
                        continue;
                    }

                    self.trigger(
                        gateway,
                        &agent,
                        ACTION_WARN,
                        serde_json::json!({
                            "title": "Logging Out",
                            "message": format!(
                                "You will be logged out in {grace_secs} seconds: {reason}."
                            ),
                            "urgency": "critical",
                        }),
                        journal,
                        hostname,
                        now,
                    )
                    .await;

                    journal.record_activity(warden_types::ActivityEvent {
                        kind: warden_types::ActivityKind::LogoutScheduled,
                        agent: agent.clone(),
                        child: None,
                        detail: format!("{reason} (grace {grace_secs}s)"),
                        at: now,
                    });
                    outcome.ui_events.push(if reason == "bedtime" {
                        UiEvent::OsBedtimeWarning {
                            agent: agent.clone(),
                            minutes_remaining: 0,
                            urgency: Urgency::Critical,
                        }
                    } else {
                        UiEvent::OsQuotaExhausted {
                            agent: agent.clone(),
                            activity: Activity::Computer,
                        }
                    });
                    outcome.logout_scheduled.push(agent);
                }

                // Focus transitions mutate the agent record and the rule
                // evaluator's view only; the supervisor applies them before
                // dispatch and no agent action exists yet.
                EnforcementIntent::FocusApply { agent, .. }
                | EnforcementIntent::FocusClear { agent } => {
                    debug!(agent = %agent, "focus intent handled upstream");
                }
            }
        }
        outcome
    }

    fn suppressed(&self, agent: &AgentId, pid: u32, now: DateTime<Utc>) -> bool {
        self.recent_kills
            .get(&(agent.clone(), pid))
            .is_some_and(|at| now - *at < Duration::seconds(KILL_SUPPRESS_SECS))
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        self.recent_kills
            .retain(|_, at| now - *at < Duration::seconds(KILL_SUPPRESS_SECS));
    }

    #[allow(clippy::too_many_arguments)]
    async fn kill<G: AgentGateway>(
        &mut self,
        gateway: &G,
        agent: &AgentId,
        pid: u32,
        name: &str,
        reason: &str,
        hostname: &str,
        settings: &Settings,
        journal: &mut Journal,
        now: DateTime<Utc>,
    ) {
        self.recent_kills.insert((agent.clone(), pid), now);

        if settings.kill_on_violation {
            self.trigger(
                gateway,
                agent,
                ACTION_KILL,
                serde_json::json!({"pid": pid, "name": name, "reason": reason}),
                journal,
                hostname,
                now,
            )
            .await;
        }
        self.trigger(
            gateway,
            agent,
            ACTION_WARN,
            serde_json::json!({
                "title": "Application Blocked",
                "message": format!("{name} is not allowed: {reason}."),
                "urgency": "normal",
            }),
            journal,
            hostname,
            now,
        )
        .await;

        journal.record_violation(Violation {
            kind: ViolationKind::BlockedProcess,
            agent: agent.clone(),
            hostname: hostname.to_string(),
            process_name: Some(name.to_string()),
            reason: reason.to_string(),
            at: now,
        });
    }

    async fn send_warning<G: AgentGateway>(
        &mut self,
        gateway: &G,
        agent: &AgentId,
        subject: WarningSubject,
        minutes_remaining: u32,
        urgency: Urgency,
        journal: &mut Journal,
        now: DateTime<Utc>,
    ) {
        let (title, message) = match subject {
            WarningSubject::Bedtime => (
                "Bedtime Soon",
                format!("Bedtime in {minutes_remaining} minutes. Time to wrap up."),
            ),
            WarningSubject::Computer => (
                "Time Running Out",
                format!("{minutes_remaining} minutes of computer time left today."),
            ),
            WarningSubject::Internet => (
                "Internet Time Running Out",
                format!("{minutes_remaining} minutes of internet time left today."),
            ),
        };
        let urgency_str = match urgency {
            Urgency::Critical => "critical",
            Urgency::Normal => "normal",
        };
        self.trigger(
            gateway,
            agent,
            ACTION_WARN,
            serde_json::json!({"title": title, "message": message, "urgency": urgency_str}),
            journal,
            "",
            now,
        )
        .await;
        journal.record_activity(warden_types::ActivityEvent {
            kind: warden_types::ActivityKind::WarningSent,
            agent: agent.clone(),
            child: None,
            detail: format!("{title}: {message}"),
            at: now,
        });
    }

    /// Trigger an action; a gateway failure is journaled, never retried
    /// here.
    #[allow(clippy::too_many_arguments)]
    async fn trigger<G: AgentGateway>(
        &mut self,
        gateway: &G,
        agent: &AgentId,
        action: &str,
        args: serde_json::Value,
        journal: &mut Journal,
        hostname: &str,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = gateway.trigger_action(agent, action, args).await {
            warn!(agent = %agent, action, error = %e, "agent action failed");
            journal.record_violation(Violation {
                kind: ViolationKind::ActionFailed,
                agent: agent.clone(),
                hostname: hostname.to_string(),
                process_name: None,
                reason: format!("{action}: {e}"),
                at: now,
            });
        }
    }
}
