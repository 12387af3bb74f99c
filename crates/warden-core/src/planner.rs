//! Quota evaluation and the per-agent enforcement state machine.
//!
//! The planner turns a quota verdict into warning-ladder intents, immediate
//! logouts, and timer directives (pre-logout warnings plus the depletion
//! forecast). Verdict authority is absolute: a ban or disallow produces a
//! logout regardless of local accounting.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use warden_types::{
    Activity, AgentId, ChildId, EnforcementIntent, QuotaVerdict, Settings, Urgency, WarningSubject,
};

use crate::rules::BedtimeLadder;
use crate::timers::WarningTimer;
use crate::usage::UsageAccountant;

/// Enforcement state of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnforceState {
    #[default]
    Idle,
    /// At least one ladder warning has fired today.
    Warning,
    /// A logout is scheduled and its grace period is running.
    GracePending,
    /// The logout action has been triggered; waiting for the agent ack.
    LoggingOut,
}

/// Per-agent planner bookkeeping.
#[derive(Debug, Default)]
pub struct AgentPlan {
    pub state: EnforceState,
    pub bedtime: BedtimeLadder,
}

/// What the quota pass decided.
#[derive(Debug, Default)]
pub struct QuotaDecision {
    pub intents: Vec<EnforcementIntent>,
    /// Pre-logout warning timers derived from the newest remaining-time
    /// estimate. Always a full replacement set.
    pub warning_timers: Vec<WarningTimer>,
    /// When quota will run out, if within the forecast horizon.
    pub depletion: Option<(DateTime<Utc>, String)>,
}

/// Planner state for every agent.
#[derive(Debug, Default)]
pub struct Planner {
    plans: HashMap<AgentId, AgentPlan>,
}

/// Forecast horizon: only arm depletion/warning timers when quota runs out
/// within the hour.
const FORECAST_HORIZON_SECS: i64 = 3600;

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_mut(&mut self, agent: &AgentId) -> &mut AgentPlan {
        self.plans.entry(agent.clone()).or_default()
    }

    pub fn state(&self, agent: &AgentId) -> EnforceState {
        self.plans
            .get(agent)
            .map(|p| p.state)
            .unwrap_or_default()
    }

    pub fn set_state(&mut self, agent: &AgentId, state: EnforceState) {
        self.plan_mut(agent).state = state;
    }

    /// Reset an agent entirely (unlink, disable, offline).
    pub fn reset(&mut self, agent: &AgentId) {
        self.plans.remove(agent);
    }

    /// Evaluate the computer-time verdict (and the internet verdict when
    /// browsers are open) for one agent.
    #[allow(clippy::too_many_arguments)]
    pub fn quota_pass(
        &mut self,
        agent: &AgentId,
        child: &ChildId,
        computer: &QuotaVerdict,
        internet: Option<&QuotaVerdict>,
        browsers_present: bool,
        accountant: &mut UsageAccountant,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> QuotaDecision {
        let mut decision = QuotaDecision::default();

        // The service is authoritative: banned or not allowed ends the
        // session, and nothing else may interleave.
        if computer.forbids() {
            decision.intents.push(EnforcementIntent::Logout {
                agent: agent.clone(),
                reason: "access blocked".into(),
                grace_secs: settings.grace_period_secs,
            });
            return decision;
        }

        let remaining = computer.remaining_secs;

        // Warning ladder: threshold t fires when remaining time is within
        // (t-1, t] minutes, once per day.
        for &threshold in &settings.warning_times {
            let lower = i64::from(threshold.saturating_sub(1)) * 60;
            let upper = i64::from(threshold) * 60;
            if remaining > lower
                && remaining <= upper
                && accountant.mark_warning_fired(agent, child, Activity::Computer, threshold)
            {
                decision.intents.push(EnforcementIntent::Warning {
                    agent: agent.clone(),
                    subject: WarningSubject::Computer,
                    minutes_remaining: threshold,
                    urgency: if threshold <= 5 {
                        Urgency::Critical
                    } else {
                        Urgency::Normal
                    },
                });
            }
        }

        if remaining <= 0 {
            decision.intents.push(EnforcementIntent::Logout {
                agent: agent.clone(),
                reason: "computer time exhausted".into(),
                grace_secs: settings.grace_period_secs,
            });
        } else if remaining <= FORECAST_HORIZON_SECS {
            // Arm the forecast from the newest estimate: a warning timer
            // per unfired threshold still ahead, and depletion at zero.
            let fired = accountant
                .cell(agent, child, Activity::Computer)
                .map(|c| c.warnings_fired.clone())
                .unwrap_or_default();
            for &threshold in &settings.warning_times {
                let offset = remaining - i64::from(threshold) * 60;
                if offset > 0 && !fired.contains(&threshold) {
                    decision.warning_timers.push(WarningTimer {
                        deadline: now + Duration::seconds(offset),
                        threshold,
                    });
                }
            }
            decision.depletion = Some((
                now + Duration::seconds(remaining),
                "computer time exhausted".into(),
            ));
        }

        // Internet is only consulted while a browser is open.
        if browsers_present {
            if let Some(verdict) = internet {
                if verdict.forbids() {
                    decision
                        .intents
                        .push(EnforcementIntent::BlockBrowsers { agent: agent.clone() });
                }
            }
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn verdict(remaining: i64) -> QuotaVerdict {
        QuotaVerdict {
            allowed: true,
            banned: false,
            remaining_secs: remaining,
            as_of: t("2026-03-06T12:00:00Z"),
        }
    }

    fn banned() -> QuotaVerdict {
        QuotaVerdict {
            allowed: false,
            banned: true,
            remaining_secs: 3600,
            as_of: t("2026-03-06T12:00:00Z"),
        }
    }

    struct Fixture {
        planner: Planner,
        accountant: UsageAccountant,
        settings: Settings,
        agent: AgentId,
        child: ChildId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                planner: Planner::new(),
                accountant: UsageAccountant::new(),
                settings: Settings::default(),
                agent: AgentId::new("a1"),
                child: ChildId::new("c1"),
            }
        }

        fn pass(&mut self, computer: &QuotaVerdict, now: DateTime<Utc>) -> QuotaDecision {
            self.planner.quota_pass(
                &self.agent,
                &self.child,
                computer,
                None,
                false,
                &mut self.accountant,
                &self.settings,
                now,
            )
        }
    }

    #[test]
    fn ban_yields_only_logout() {
        let mut fx = Fixture::new();
        let decision = fx.pass(&banned(), t("2026-03-06T12:00:00Z"));
        assert_eq!(decision.intents.len(), 1);
        assert!(matches!(
            &decision.intents[0],
            EnforcementIntent::Logout { reason, .. } if reason == "access blocked"
        ));
        assert!(decision.warning_timers.is_empty());
        assert!(decision.depletion.is_none());
    }

    #[test]
    fn ladder_fires_each_threshold_once() {
        let mut fx = Fixture::new();
        let now = t("2026-03-06T12:00:00Z");

        // 900s = 15 minutes: the 15-minute warning.
        let decision = fx.pass(&verdict(900), now);
        let warnings: Vec<_> = decision
            .intents
            .iter()
            .filter(|i| matches!(i, EnforcementIntent::Warning { .. }))
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            warnings[0],
            EnforcementIntent::Warning {
                minutes_remaining: 15,
                urgency: Urgency::Normal,
                ..
            }
        ));

        // Same verdict again: suppressed.
        let decision = fx.pass(&verdict(890), now + Duration::seconds(30));
        assert!(decision
            .intents
            .iter()
            .all(|i| !matches!(i, EnforcementIntent::Warning { .. })));

        // 300s: the 5-minute warning, critical.
        let decision = fx.pass(&verdict(300), now + Duration::seconds(600));
        assert!(decision.intents.iter().any(|i| matches!(
            i,
            EnforcementIntent::Warning {
                minutes_remaining: 5,
                urgency: Urgency::Critical,
                ..
            }
        )));
    }

    #[test]
    fn exhausted_yields_logout_with_grace() {
        let mut fx = Fixture::new();
        let decision = fx.pass(&verdict(0), t("2026-03-06T12:00:00Z"));
        assert!(decision.intents.iter().any(|i| matches!(
            i,
            EnforcementIntent::Logout { reason, grace_secs: 60, .. }
                if reason == "computer time exhausted"
        )));
        assert!(decision.depletion.is_none());
    }

    #[test]
    fn forecast_arms_timers_within_horizon() {
        let mut fx = Fixture::new();
        let now = t("2026-03-06T12:00:00Z");
        let decision = fx.pass(&verdict(1800), now);

        // 30 minutes out: no immediate warnings.
        assert!(decision.intents.is_empty());
        // Warning timers at remaining - t*60 for each threshold.
        let deadlines: Vec<_> = decision
            .warning_timers
            .iter()
            .map(|w| (w.threshold, (w.deadline - now).num_seconds()))
            .collect();
        assert!(deadlines.contains(&(15, 900)));
        assert!(deadlines.contains(&(5, 1500)));
        assert!(deadlines.contains(&(1, 1740)));
        // Depletion at remaining.
        let (deadline, reason) = decision.depletion.unwrap();
        assert_eq!((deadline - now).num_seconds(), 1800);
        assert_eq!(reason, "computer time exhausted");
    }

    #[test]
    fn forecast_skips_fired_thresholds() {
        let mut fx = Fixture::new();
        let now = t("2026-03-06T12:00:00Z");
        // The 15-minute warning fires now; its timer must not be re-armed.
        let decision = fx.pass(&verdict(900), now);
        assert!(decision.intents.iter().any(|i| matches!(
            i,
            EnforcementIntent::Warning { minutes_remaining: 15, .. }
        )));
        assert!(decision.warning_timers.iter().all(|w| w.threshold != 15));
        assert!(decision
            .warning_timers
            .iter()
            .any(|w| w.threshold == 5 && (w.deadline - now).num_seconds() == 600));
    }

    #[test]
    fn no_forecast_beyond_horizon() {
        let mut fx = Fixture::new();
        let decision = fx.pass(&verdict(7200), t("2026-03-06T12:00:00Z"));
        assert!(decision.intents.is_empty());
        assert!(decision.warning_timers.is_empty());
        assert!(decision.depletion.is_none());
    }

    #[test]
    fn browsers_trigger_internet_check() {
        let mut fx = Fixture::new();
        let now = t("2026-03-06T12:00:00Z");
        let not_allowed = QuotaVerdict {
            allowed: false,
            banned: false,
            remaining_secs: 0,
            as_of: now,
        };

        let decision = fx.planner.quota_pass(
            &fx.agent,
            &fx.child,
            &verdict(7200),
            Some(&not_allowed),
            true,
            &mut fx.accountant,
            &fx.settings,
            now,
        );
        assert!(decision
            .intents
            .iter()
            .any(|i| matches!(i, EnforcementIntent::BlockBrowsers { .. })));

        // No browsers open: the internet verdict is irrelevant.
        let decision = fx.planner.quota_pass(
            &fx.agent,
            &fx.child,
            &verdict(7200),
            Some(&not_allowed),
            false,
            &mut fx.accountant,
            &fx.settings,
            now,
        );
        assert!(decision.intents.is_empty());
    }

    #[test]
    fn state_defaults_to_idle_and_resets() {
        let mut planner = Planner::new();
        let agent = AgentId::new("a1");
        assert_eq!(planner.state(&agent), EnforceState::Idle);
        planner.set_state(&agent, EnforceState::GracePending);
        assert_eq!(planner.state(&agent), EnforceState::GracePending);
        planner.reset(&agent);
        assert_eq!(planner.state(&agent), EnforceState::Idle);
    }
}
