//! The supervisor: the stateful coordinator fusing agent telemetry, quota
//! verdicts, and wall-clock schedules into per-agent enforcement.
//!
//! All handlers take an explicit `now` so every decision is a deterministic
//! function of (state, event, clock); the daemon's event loop supplies the
//! wall clock, replay tests supply a scripted one. The loop processes one
//! event at a time, which is what guarantees per-agent ordering.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use warden_control::{AgentSummary, ControlCommand, ControlResponse, StatusSummary, UiEvent};
use warden_gateway::{
    scripts, AgentGateway, GatewayEvent, ACTION_KILL, ACTION_LOGOUT, MONITOR_PROCESS,
    MONITOR_SESSION,
};
use warden_quota::{CachedVerdict, QuotaClient, VerdictCache};
use warden_types::{
    Activity, ActivityEvent, ActivityKind, Agent, AgentId, ChildConfig, ChildId, DeployedScript,
    EnforcementIntent, PersistedState, ProcessPayload, ProcessSnapshot, QuotaVerdict, Session,
    SessionPayload, Settings, Violation, ViolationKind, WardenError,
};

use crate::dispatch::Dispatcher;
use crate::journal::Journal;
use crate::planner::{EnforceState, Planner};
use crate::registry::AgentRegistry;
use crate::rules;
use crate::timers::{FiredTimer, LogoutStage, TimerTable};
use crate::usage::UsageAccountant;

/// Telemetry gap, in report intervals, after which per-agent timers are
/// cancelled.
const TIMER_CANCEL_GAP: u32 = 2;

/// Telemetry gap, in report intervals, after which an agent is flagged
/// offline.
const OFFLINE_GAP: u32 = 3;

/// The control plane's central coordinator.
pub struct Supervisor<G, Q> {
    gateway: G,
    quota: Q,
    settings: Settings,
    registry: AgentRegistry,
    children: HashMap<ChildId, ChildConfig>,
    accountant: UsageAccountant,
    cache: VerdictCache,
    timers: TimerTable,
    journal: Journal,
    planner: Planner,
    dispatcher: Dispatcher,
    snapshots: HashMap<AgentId, ProcessSnapshot>,
    ui_subscribers: Vec<mpsc::Sender<UiEvent>>,
    last_sync: Option<DateTime<Utc>>,
    dirty: bool,
}

impl<G: AgentGateway, Q: QuotaClient> Supervisor<G, Q> {
    /// Build a supervisor from a persisted state blob. Timers are not
    /// restored; they are recomputed from fresh verdicts as telemetry
    /// arrives.
    pub fn new(gateway: G, quota: Q, state: PersistedState) -> Self {
        Self {
            gateway,
            quota,
            settings: state.settings,
            registry: AgentRegistry::restore(
                state.agents,
                state.user_mappings,
                state.parent_accounts,
            ),
            children: state.children,
            accountant: UsageAccountant::new(),
            cache: VerdictCache::new(),
            timers: TimerTable::new(),
            journal: Journal::restore(state.violations, state.activity_log),
            planner: Planner::new(),
            dispatcher: Dispatcher::new(),
            snapshots: HashMap::new(),
            ui_subscribers: Vec::new(),
            last_sync: state.last_sync,
            dirty: false,
        }
    }

    /// Probe the gateway and deploy scripts to every known agent. An
    /// unreachable gateway is fatal: the daemon publishes `status=error`
    /// and never enters the monitoring state.
    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<(), WardenError> {
        let agents = self
            .gateway
            .list_agents()
            .await
            .map_err(|e| WardenError::GatewayUnavailable(e.to_string()))?;

        info!(count = agents.len(), "gateway reachable, syncing agent registry");
        for agent in agents {
            let id = agent.id.clone();
            self.registry.upsert_discovered(agent);
            self.deploy_scripts(&id, now).await;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------

    /// Apply one gateway event.
    pub async fn handle_gateway_event(&mut self, event: GatewayEvent, now: DateTime<Utc>) {
        match event {
            GatewayEvent::Discovered { agent } => {
                let id = agent.id.clone();
                let hostname = agent.hostname.clone();
                info!(agent = %id, hostname, "agent discovered");
                self.registry.upsert_discovered(agent);
                self.deploy_scripts(&id, now).await;
                self.record_activity(&id, ActivityKind::AgentDiscovered, hostname, now);
                self.dirty = true;
            }
            GatewayEvent::Online { agent } => {
                if let Some(record) = self.registry.get_mut(&agent) {
                    record.online = true;
                    record.last_seen = now;
                }
                self.record_activity(&agent, ActivityKind::AgentOnline, "agent online", now);
                // Re-evaluate from a fresh verdict on return.
                if let Some(child) = self.child_for(&agent) {
                    self.cache.invalidate_child(&child);
                }
                self.evaluate_agent(&agent, Vec::new(), now).await;
            }
            GatewayEvent::Offline { agent } => {
                self.mark_offline(&agent, now);
            }
            GatewayEvent::Telemetry {
                agent,
                monitor,
                payload,
            } => match monitor.as_str() {
                MONITOR_SESSION => self.handle_session_telemetry(&agent, payload, now).await,
                MONITOR_PROCESS => self.handle_process_telemetry(&agent, payload, now).await,
                other => debug!(agent = %agent, monitor = other, "unknown monitor payload"),
            },
            GatewayEvent::ActionResponse {
                agent,
                action,
                success,
                args,
            } => self.handle_action_response(&agent, &action, success, args, now),
        }
    }

    async fn handle_session_telemetry(
        &mut self,
        agent_id: &AgentId,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) {
        let payload: SessionPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(agent = %agent_id, error = %e, "malformed session payload");
                return;
            }
        };

        let Some(transition) = self.registry.observe_session(agent_id, &payload, now) else {
            debug!(agent = %agent_id, "session telemetry for unknown agent");
            return;
        };

        // Flush usage to the old child before anything else sees the new
        // session.
        if let Some((prior, Some(prior_child))) = &transition.ended {
            let idle = prior.is_idle(self.settings.idle_threshold_ms);
            self.advance_usage(agent_id, prior_child, idle, now);
            self.record_activity(
                agent_id,
                ActivityKind::SessionEnded,
                format!("session for {} ended", prior.username),
                now,
            );
        }
        if transition.changed {
            self.record_activity(
                agent_id,
                ActivityKind::SessionStarted,
                format!("session for {} started", transition.session.username),
                now,
            );
        }
        self.emit_ui(vec![UiEvent::OsSessionUpdate {
            agent: agent_id.clone(),
            session: Some(transition.session.clone()),
        }]);

        // Parental sessions are tracked but never produce intents, and the
        // quota service is never consulted for them.
        if transition.session.parental {
            return;
        }
        let Some(child) = transition.child else {
            // MissingBinding: reachability tracking only.
            return;
        };
        if !self.agent_enabled(agent_id) {
            return;
        }

        let idle = transition.session.is_idle(self.settings.idle_threshold_ms);
        self.advance_usage(agent_id, &child, idle, now);
        self.evaluate_agent(agent_id, Vec::new(), now).await;
    }

    async fn handle_process_telemetry(
        &mut self,
        agent_id: &AgentId,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) {
        let payload: ProcessPayload = match serde_json::from_value(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!(agent = %agent_id, error = %e, "malformed process payload");
                return;
            }
        };
        let snapshot = ProcessSnapshot::from(payload);

        let Some(agent) = self.registry.get_mut(agent_id) else {
            debug!(agent = %agent_id, "process telemetry for unknown agent");
            return;
        };
        agent.last_seen = now;
        agent.online = true;
        let session = agent.current_session.clone();
        let focus = agent.focus_active.clone();
        self.snapshots.insert(agent_id.clone(), snapshot.clone());

        let Some(session) = session else {
            return;
        };
        if session.parental {
            return;
        }
        let Some(child_id) = self.registry.resolve_child(agent_id, &session.username) else {
            return;
        };
        if !self.agent_enabled(agent_id) {
            return;
        }

        let idle = session.is_idle(self.settings.idle_threshold_ms);
        self.advance_usage(agent_id, &child_id, idle, now);

        // Rule passes over the fresh snapshot.
        let child = self.children.get(&child_id).cloned().unwrap_or_default();
        let (intents, detections) = rules::evaluate_snapshot(
            agent_id,
            &snapshot,
            &child,
            focus.as_ref(),
            now,
            &self.settings,
        );
        let detection_events: Vec<UiEvent> = detections
            .into_iter()
            .map(|(process_name, pattern)| UiEvent::OsBlockedProcessDetected {
                agent: agent_id.clone(),
                process_name,
                pattern,
            })
            .collect();
        self.emit_ui(detection_events);

        self.evaluate_agent(agent_id, intents, now).await;
    }

    fn handle_action_response(
        &mut self,
        agent_id: &AgentId,
        action: &str,
        success: bool,
        args: serde_json::Value,
        now: DateTime<Utc>,
    ) {
        let hostname = self.hostname(agent_id);
        if !success {
            // PermissionDenied or unsupported platform: recorded, never
            // retried, planner state unchanged.
            let error = args["error"].as_str().unwrap_or("unknown error").to_string();
            warn!(agent = %agent_id, action, error, "agent action reported failure");
            self.journal.record_violation(Violation {
                kind: ViolationKind::ActionFailed,
                agent: agent_id.clone(),
                hostname,
                process_name: args["name"].as_str().map(String::from),
                reason: format!("{action}: {error}"),
                at: now,
            });
            return;
        }

        match action {
            ACTION_KILL => {
                let violation = Violation {
                    kind: ViolationKind::ProcessKilled,
                    agent: agent_id.clone(),
                    hostname,
                    process_name: args["name"].as_str().map(String::from),
                    reason: args["reason"].as_str().unwrap_or("blocked").to_string(),
                    at: now,
                };
                self.emit_ui(vec![UiEvent::OsViolation {
                    violation: violation.clone(),
                }]);
                self.journal.record_violation(violation);
            }
            ACTION_LOGOUT => {
                self.planner.set_state(agent_id, EnforceState::Idle);
                self.record_activity(agent_id, ActivityKind::LogoutCompleted, "logout completed", now);
            }
            _ => {}
        }
    }

    /// Service-side state change: drop cached verdicts, cancel timers, and
    /// re-evaluate every bound agent from a fresh verdict.
    pub async fn handle_quota_change(&mut self, child: &ChildId, now: DateTime<Utc>) {
        info!(child = %child, "quota state changed");
        self.cache.invalidate_child(child);
        // Fresh ladder: thresholds fire again if recrossed under the new
        // allowance.
        self.accountant.clear_warnings_for_child(child);

        for agent_id in self.registry.bound_to(child) {
            if self.timers.has_logout(&agent_id) {
                self.timers.cancel_logout(&agent_id);
                self.record_activity(
                    &agent_id,
                    ActivityKind::LogoutCancelled,
                    "quota state changed",
                    now,
                );
            }
            self.timers.cancel_agent(&agent_id);
            if self.planner.state(&agent_id) == EnforceState::GracePending {
                self.planner.set_state(&agent_id, EnforceState::Idle);
            }
            self.evaluate_agent(&agent_id, Vec::new(), now).await;
        }
    }

    /// Periodic tick: fire due timers and detect telemetry gaps.
    pub async fn tick(&mut self, now: DateTime<Utc>) {
        for (agent_id, fired) in self.timers.due(now) {
            match fired {
                FiredTimer::Warning { threshold } => {
                    self.fire_warning_timer(&agent_id, threshold, now).await;
                }
                FiredTimer::Logout { reason, stage } => match stage {
                    LogoutStage::Grace => self.execute_logout(&agent_id, &reason, now).await,
                    LogoutStage::Depletion => {
                        // Forecast came due: issue the real logout.
                        let intent = EnforcementIntent::Logout {
                            agent: agent_id.clone(),
                            reason,
                            grace_secs: self.settings.grace_period_secs,
                        };
                        self.dispatch(&agent_id, vec![intent], now).await;
                    }
                },
            }
        }

        self.detect_gaps(now);
    }

    // -----------------------------------------------------------------
    // Control API
    // -----------------------------------------------------------------

    /// Execute one control command. Invalid commands reject without
    /// touching state.
    pub async fn handle_command(
        &mut self,
        command: ControlCommand,
        now: DateTime<Utc>,
    ) -> ControlResponse {
        match command {
            ControlCommand::GetStatus => {
                let status = StatusSummary {
                    agent_count: self.registry.len(),
                    active_agents: self.registry.iter().filter(|a| a.online).count(),
                    monitored_children: self.registry.monitored_children(),
                    recent_violations: self.journal.violations(Some(10)),
                    settings: self.settings.clone(),
                    last_sync: self.last_sync,
                };
                match serde_json::to_value(&status) {
                    Ok(data) => ControlResponse::ok_with_data("status", data),
                    Err(e) => ControlResponse::error(format!("status serialization: {e}")),
                }
            }

            ControlCommand::GetAgents => {
                let agents: Vec<AgentSummary> =
                    self.registry.iter().map(AgentSummary::from).collect();
                match serde_json::to_value(&agents) {
                    Ok(data) => ControlResponse::ok_with_data("agents", data),
                    Err(e) => ControlResponse::error(format!("agent serialization: {e}")),
                }
            }

            ControlCommand::LinkAgent { agent, child } => {
                match self.registry.bind(&agent, child.clone()) {
                    Ok(()) => {
                        self.children.entry(child.clone()).or_default();
                        self.record_activity(
                            &agent,
                            ActivityKind::AgentLinked,
                            format!("linked to child {child}"),
                            now,
                        );
                        self.dirty = true;
                        self.evaluate_agent(&agent, Vec::new(), now).await;
                        ControlResponse::ok("agent linked")
                    }
                    Err(e) => ControlResponse::error(e),
                }
            }

            ControlCommand::UnlinkAgent { agent } => match self.registry.unbind(&agent) {
                Ok(prior) => {
                    self.timers.cancel_agent(&agent);
                    self.planner.reset(&agent);
                    self.accountant.forget_agent(&agent);
                    self.record_activity(
                        &agent,
                        ActivityKind::AgentUnlinked,
                        match prior {
                            Some(child) => format!("unlinked from child {child}"),
                            None => "unlinked (no prior binding)".to_string(),
                        },
                        now,
                    );
                    self.dirty = true;
                    ControlResponse::ok("agent unlinked")
                }
                Err(e) => ControlResponse::error(e),
            },

            ControlCommand::SetUserMapping {
                agent,
                username,
                child,
            } => {
                if self.registry.get(&agent).is_none() {
                    return ControlResponse::error(format!("unknown agent: {agent}"));
                }
                self.registry.set_mapping(&agent, &username, child);
                self.dirty = true;
                ControlResponse::ok("mapping updated")
            }

            ControlCommand::SetParentAccounts { agent, usernames } => {
                if self.registry.get(&agent).is_none() {
                    return ControlResponse::error(format!("unknown agent: {agent}"));
                }
                self.registry.set_parents(&agent, usernames);
                self.dirty = true;
                ControlResponse::ok("parent accounts updated")
            }

            ControlCommand::UpdateChildSettings { child, patch } => {
                self.children.entry(child).or_default().apply(patch);
                self.dirty = true;
                ControlResponse::ok("child settings updated")
            }

            ControlCommand::GetViolations { limit } => {
                match serde_json::to_value(self.journal.violations(limit)) {
                    Ok(data) => ControlResponse::ok_with_data("violations", data),
                    Err(e) => ControlResponse::error(format!("serialization: {e}")),
                }
            }

            ControlCommand::ClearViolations => {
                self.journal.clear_violations();
                self.dirty = true;
                ControlResponse::ok("violations cleared")
            }

            ControlCommand::GetActivityLog { limit } => {
                match serde_json::to_value(self.journal.activity(limit)) {
                    Ok(data) => ControlResponse::ok_with_data("activity", data),
                    Err(e) => ControlResponse::error(format!("serialization: {e}")),
                }
            }

            ControlCommand::GetSettings => match serde_json::to_value(&self.settings) {
                Ok(data) => ControlResponse::ok_with_data("settings", data),
                Err(e) => ControlResponse::error(format!("serialization: {e}")),
            },

            ControlCommand::UpdateSettings { patch } => {
                let interval_changed = self.settings.apply(patch);
                self.dirty = true;
                if interval_changed {
                    self.redeploy_monitor_intervals().await;
                }
                match serde_json::to_value(&self.settings) {
                    Ok(data) => ControlResponse::ok_with_data("settings updated", data),
                    Err(e) => ControlResponse::error(format!("serialization: {e}")),
                }
            }

            ControlCommand::ForceLogout { agent } => {
                if self.registry.get(&agent).is_none() {
                    return ControlResponse::error(format!("unknown agent: {agent}"));
                }
                let intent = EnforcementIntent::Logout {
                    agent: agent.clone(),
                    reason: "parent request".into(),
                    grace_secs: self.settings.grace_period_secs,
                };
                self.dispatch(&agent, vec![intent], now).await;
                ControlResponse::ok("logout scheduled")
            }

            ControlCommand::LockSession { agent } => {
                if self.registry.get(&agent).is_none() {
                    return ControlResponse::error(format!("unknown agent: {agent}"));
                }
                let intent = EnforcementIntent::Lock { agent: agent.clone() };
                self.dispatch(&agent, vec![intent], now).await;
                ControlResponse::ok("lock dispatched")
            }

            ControlCommand::TriggerFocusMode {
                agent,
                enabled,
                child,
            } => self.trigger_focus(&agent, enabled, &child, now),

            ControlCommand::Watch => {
                // The socket server handles watch itself; reaching the
                // supervisor is a protocol error.
                ControlResponse::error("watch is handled by the control server")
            }
        }
    }

    fn trigger_focus(
        &mut self,
        agent_id: &AgentId,
        enabled: bool,
        child: &ChildId,
        now: DateTime<Utc>,
    ) -> ControlResponse {
        let Some(profile) = self.children.get(child).and_then(|c| c.focus_mode.clone()) else {
            return ControlResponse::error(format!("child {child} has no focus profile"));
        };
        let Some(agent) = self.registry.get_mut(agent_id) else {
            return ControlResponse::error(format!("unknown agent: {agent_id}"));
        };

        if enabled {
            // Idempotent: re-applying the same profile is a no-op.
            if agent.focus_active.as_ref() == Some(&profile) {
                return ControlResponse::ok("focus already active");
            }
            agent.focus_active = Some(profile);
            self.record_activity(agent_id, ActivityKind::FocusApplied, "focus mode on", now);
        } else {
            if agent.focus_active.is_none() {
                return ControlResponse::ok("focus already off");
            }
            agent.focus_active = None;
            self.record_activity(agent_id, ActivityKind::FocusCleared, "focus mode off", now);
        }
        self.dirty = true;
        ControlResponse::ok(if enabled { "focus applied" } else { "focus cleared" })
    }

    // -----------------------------------------------------------------
    // Evaluation core
    // -----------------------------------------------------------------

    /// The planner's coherence point for one agent: bedtime pass, quota
    /// pass, then a single deduplicated dispatch.
    async fn evaluate_agent(
        &mut self,
        agent_id: &AgentId,
        mut intents: Vec<EnforcementIntent>,
        now: DateTime<Utc>,
    ) {
        let Some(agent) = self.registry.get(agent_id) else {
            return;
        };
        if !agent.enabled {
            return;
        }
        let Some(session) = agent.current_session.clone() else {
            // Nothing to enforce without a session; rule intents from the
            // caller still dispatch (a snapshot implies someone is active).
            if !intents.is_empty() {
                self.dispatch(agent_id, intents, now).await;
            }
            return;
        };
        if session.parental {
            return;
        }
        let Some(child_id) = self.registry.resolve_child(agent_id, &session.username) else {
            return;
        };
        let child = self.children.get(&child_id).cloned().unwrap_or_default();

        // Bedtime pass runs on every evaluation; it is purely clock-driven.
        let bedtime =
            rules::evaluate_bedtime(
                agent_id,
                &child,
                &mut self.planner.plan_mut(agent_id).bedtime,
                now,
                &self.settings,
            );
        intents.extend(bedtime);

        // Quota pass, subject to the stale-verdict rules.
        if let Some(computer) = self.verdict_for(&child_id, Activity::Computer, now).await {
            let browsers_present = self
                .snapshots
                .get(agent_id)
                .is_some_and(|s| s.browsers_present());
            let internet = if browsers_present {
                self.verdict_for(&child_id, Activity::Internet, now).await
            } else {
                None
            };

            let decision = self.planner.quota_pass(
                agent_id,
                &child_id,
                &computer,
                internet.as_ref(),
                browsers_present,
                &mut self.accountant,
                &self.settings,
                now,
            );

            self.timers.set_warnings(agent_id, decision.warning_timers);
            if let Some((deadline, reason)) = decision.depletion {
                self.timers.arm_depletion(agent_id, deadline, reason);
            }
            intents.extend(decision.intents);
        }

        self.dispatch(agent_id, intents, now).await;
    }

    /// Look up a verdict, consulting the service on cache miss. Returns
    /// `None` when enforcement must defer (service down, cache beyond TTL).
    async fn verdict_for(
        &mut self,
        child: &ChildId,
        activity: Activity,
        now: DateTime<Utc>,
    ) -> Option<QuotaVerdict> {
        if let CachedVerdict::Fresh(verdict) = self.cache.lookup(child, activity, now) {
            return Some(verdict);
        }
        match self.quota.check(child, activity).await {
            Ok(verdict) => {
                self.cache.store(child, activity, verdict);
                Some(verdict)
            }
            Err(e) => {
                // Within TTL the cached verdict still counts; past it,
                // enforcement defers. Armed timers keep running either way.
                match self.cache.lookup(child, activity, now) {
                    CachedVerdict::Fresh(verdict) => Some(verdict),
                    CachedVerdict::Stale(_) | CachedVerdict::Missing => {
                        warn!(child = %child, %activity, error = %e, "quota check failed, deferring enforcement");
                        None
                    }
                }
            }
        }
    }

    /// Dispatch intents for one agent and apply the resulting state-machine
    /// transitions.
    async fn dispatch(
        &mut self,
        agent_id: &AgentId,
        intents: Vec<EnforcementIntent>,
        now: DateTime<Utc>,
    ) {
        if intents.is_empty() {
            return;
        }
        let hostname = self.hostname(agent_id);
        let outcome = self
            .dispatcher
            .dispatch(
                &self.gateway,
                intents,
                self.snapshots.get(agent_id),
                &hostname,
                &self.settings,
                &mut self.timers,
                &mut self.journal,
                now,
            )
            .await;

        if outcome.logout_scheduled.contains(agent_id) {
            self.planner.set_state(agent_id, EnforceState::GracePending);
        } else if outcome.warned.contains(agent_id)
            && self.planner.state(agent_id) == EnforceState::Idle
        {
            self.planner.set_state(agent_id, EnforceState::Warning);
        }
        self.emit_ui(outcome.ui_events);
    }

    async fn fire_warning_timer(&mut self, agent_id: &AgentId, threshold: u32, now: DateTime<Utc>) {
        let Some(agent) = self.registry.get(agent_id) else {
            return;
        };
        if !agent.enabled {
            return;
        }
        let Some(session) = agent.current_session.clone() else {
            return;
        };
        if session.parental {
            return;
        }
        let Some(child_id) = self.registry.resolve_child(agent_id, &session.username) else {
            return;
        };
        // Once per (agent, activity, threshold, day), whether emitted by a
        // verdict pass or a timer.
        if !self
            .accountant
            .mark_warning_fired(agent_id, &child_id, Activity::Computer, threshold)
        {
            return;
        }
        let intent = EnforcementIntent::Warning {
            agent: agent_id.clone(),
            subject: warden_types::WarningSubject::Computer,
            minutes_remaining: threshold,
            urgency: if threshold <= 5 {
                warden_types::Urgency::Critical
            } else {
                warden_types::Urgency::Normal
            },
        };
        self.dispatch(agent_id, vec![intent], now).await;
    }

    /// Grace expired: run the agent's `logout` action.
    async fn execute_logout(&mut self, agent_id: &AgentId, reason: &str, now: DateTime<Utc>) {
        info!(agent = %agent_id, reason, "grace elapsed, logging out");
        let hostname = self.hostname(agent_id);
        if let Err(e) = self
            .gateway
            .trigger_action(agent_id, ACTION_LOGOUT, serde_json::json!({"reason": reason}))
            .await
        {
            warn!(agent = %agent_id, error = %e, "logout action failed");
            self.journal.record_violation(Violation {
                kind: ViolationKind::ActionFailed,
                agent: agent_id.clone(),
                hostname,
                process_name: None,
                reason: format!("logout: {e}"),
                at: now,
            });
            // Re-evaluation on the next telemetry will try again.
            self.planner.set_state(agent_id, EnforceState::Idle);
            return;
        }

        self.planner.set_state(agent_id, EnforceState::LoggingOut);
        self.journal.record_violation(Violation {
            kind: if reason == "bedtime" {
                ViolationKind::BedtimeEnforced
            } else {
                ViolationKind::QuotaExhausted
            },
            agent: agent_id.clone(),
            hostname,
            process_name: None,
            reason: reason.to_string(),
            at: now,
        });
    }

    /// Cancel timers at two missed intervals; flag offline at three.
    fn detect_gaps(&mut self, now: DateTime<Utc>) {
        let interval = self.settings.report_interval();
        let cancel_after = interval * TIMER_CANCEL_GAP as i32;
        let offline_after = interval * OFFLINE_GAP as i32;

        let mut to_cancel = Vec::new();
        let mut to_offline = Vec::new();
        for agent in self.registry.iter() {
            if !agent.online {
                continue;
            }
            let gap = now - agent.last_seen;
            if gap > cancel_after {
                to_cancel.push(agent.id.clone());
            }
            if gap > offline_after {
                to_offline.push(agent.id.clone());
            }
        }

        for agent_id in to_cancel {
            self.timers.cancel_agent(&agent_id);
        }
        for agent_id in to_offline {
            self.mark_offline(&agent_id, now);
        }
    }

    fn mark_offline(&mut self, agent_id: &AgentId, now: DateTime<Utc>) {
        let was_online = self
            .registry
            .get_mut(agent_id)
            .map(|agent| std::mem::replace(&mut agent.online, false))
            .unwrap_or(false);
        if !was_online {
            return;
        }
        self.timers.cancel_agent(agent_id);
        self.planner.reset(agent_id);
        self.record_activity(agent_id, ActivityKind::AgentOffline, "telemetry gap", now);
    }

    // -----------------------------------------------------------------
    // Deployment
    // -----------------------------------------------------------------

    /// Push the monitor and action manifest to one agent. Failures are
    /// logged and retried on the next discovery.
    async fn deploy_scripts(&mut self, agent_id: &AgentId, _now: DateTime<Utc>) {
        let Some(platform) = self.registry.get(agent_id).map(|a| a.platform) else {
            return;
        };
        let mut deployed = Vec::new();

        for spec in scripts::MONITORS {
            let Some(deployment) = spec.deployment_for(platform, self.settings.monitor_interval_ms)
            else {
                continue;
            };
            match self.gateway.deploy_monitor(agent_id, deployment).await {
                Ok(()) => deployed.push(DeployedScript {
                    id: spec.id.to_string(),
                    kind: warden_types::agent::ScriptKind::Monitor,
                    interval_ms: Some(self.settings.monitor_interval_ms),
                }),
                Err(e) => {
                    warn!(agent = %agent_id, monitor = spec.id, error = %e, "monitor deployment failed")
                }
            }
        }
        for spec in scripts::ACTIONS {
            let Some(deployment) = spec.deployment_for(platform) else {
                continue;
            };
            match self.gateway.deploy_action(agent_id, deployment).await {
                Ok(()) => deployed.push(DeployedScript {
                    id: spec.id.to_string(),
                    kind: warden_types::agent::ScriptKind::Action,
                    interval_ms: None,
                }),
                Err(e) => {
                    warn!(agent = %agent_id, action = spec.id, error = %e, "action deployment failed")
                }
            }
        }

        if let Some(agent) = self.registry.get_mut(agent_id) {
            agent.deployed = deployed;
        }
    }

    /// Monitor interval changed: update every agent's deployed monitors.
    async fn redeploy_monitor_intervals(&mut self) {
        let interval = self.settings.monitor_interval_ms;
        let agents: Vec<AgentId> = self.registry.iter().map(|a| a.id.clone()).collect();
        for agent_id in agents {
            for monitor in [MONITOR_SESSION, MONITOR_PROCESS] {
                if let Err(e) = self
                    .gateway
                    .update_monitor(&agent_id, monitor, interval)
                    .await
                {
                    warn!(agent = %agent_id, monitor, error = %e, "monitor interval update failed");
                }
            }
            if let Some(agent) = self.registry.get_mut(&agent_id) {
                for script in &mut agent.deployed {
                    if script.interval_ms.is_some() {
                        script.interval_ms = Some(interval);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Shutdown and persistence
    // -----------------------------------------------------------------

    /// Cancel every timer and best-effort remove deployed scripts.
    pub async fn shutdown(&mut self) {
        info!("supervisor shutting down, cancelling timers");
        self.timers.cancel_all();
        let agents: Vec<AgentId> = self.registry.iter().map(|a| a.id.clone()).collect();
        for agent_id in agents {
            for monitor in [MONITOR_SESSION, MONITOR_PROCESS] {
                if let Err(e) = self.gateway.remove_monitor(&agent_id, monitor).await {
                    debug!(agent = %agent_id, monitor, error = %e, "monitor removal failed (shutdown)");
                }
            }
        }
    }

    /// Snapshot the durable state.
    pub fn persisted_state(&mut self, now: DateTime<Utc>) -> PersistedState {
        let (agents, user_mappings, parent_accounts) = self.registry.to_parts();
        self.last_sync = Some(now);
        PersistedState {
            agents,
            user_mappings,
            parent_accounts,
            children: self.children.clone(),
            settings: self.settings.clone(),
            violations: self.journal.violations(None),
            activity_log: self.journal.activity(None),
            last_sync: self.last_sync,
        }
    }

    /// Whether a state-affecting command ran since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Register a UI event subscriber (a `watch` connection).
    pub fn add_ui_subscriber(&mut self, tx: mpsc::Sender<UiEvent>) {
        self.ui_subscribers.push(tx);
    }

    /// Subscribe to raw journal entries.
    pub fn subscribe_journal(&mut self) -> mpsc::Receiver<crate::journal::JournalEntry> {
        self.journal.subscribe()
    }

    // -----------------------------------------------------------------
    // Small helpers
    // -----------------------------------------------------------------

    fn advance_usage(&mut self, agent_id: &AgentId, child: &ChildId, idle: bool, now: DateTime<Utc>) {
        let count_computer = !(idle && self.settings.pause_on_idle);
        self.accountant.advance(
            agent_id,
            child,
            Activity::Computer,
            now,
            count_computer,
            self.settings.monitor_interval_ms,
            self.settings.tz_offset_minutes,
        );
        let browsers_open = self
            .snapshots
            .get(agent_id)
            .is_some_and(|s| s.browsers_present());
        self.accountant.advance(
            agent_id,
            child,
            Activity::Internet,
            now,
            browsers_open,
            self.settings.monitor_interval_ms,
            self.settings.tz_offset_minutes,
        );
    }

    fn agent_enabled(&self, agent_id: &AgentId) -> bool {
        self.registry.get(agent_id).is_some_and(|a| a.enabled)
    }

    /// The child an agent currently enforces for: the active non-parental
    /// session's resolution, falling back to the agent-level binding.
    fn child_for(&self, agent_id: &AgentId) -> Option<ChildId> {
        let agent = self.registry.get(agent_id)?;
        if let Some(session) = &agent.current_session {
            if !session.parental {
                if let Some(child) = self.registry.resolve_child(agent_id, &session.username) {
                    return Some(child);
                }
            }
        }
        agent.child_id.clone()
    }

    fn hostname(&self, agent_id: &AgentId) -> String {
        self.registry
            .get(agent_id)
            .map(|a| a.hostname.clone())
            .unwrap_or_default()
    }

    fn record_activity(
        &mut self,
        agent_id: &AgentId,
        kind: ActivityKind,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let child = self.child_for(agent_id);
        self.journal.record_activity(ActivityEvent {
            kind,
            agent: agent_id.clone(),
            child,
            detail: detail.into(),
            at: now,
        });
    }

    fn emit_ui(&mut self, events: Vec<UiEvent>) {
        if events.is_empty() {
            return;
        }
        for event in events {
            self.ui_subscribers
                .retain(|tx| tx.try_send(event.clone()).is_ok() || !tx.is_closed());
        }
    }

    // -----------------------------------------------------------------
    // Read accessors (tests and daemon)
    // -----------------------------------------------------------------

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn timer_table(&self) -> &TimerTable {
        &self.timers
    }

    pub fn enforce_state(&self, agent: &AgentId) -> EnforceState {
        self.planner.state(agent)
    }

    pub fn agent(&self, agent: &AgentId) -> Option<&Agent> {
        self.registry.get(agent)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn accumulated_secs(&self, agent: &AgentId, child: &ChildId, activity: Activity) -> u64 {
        self.accountant.accumulated_secs(agent, child, activity)
    }

    pub fn current_session(&self, agent: &AgentId) -> Option<&Session> {
        self.registry.get(agent).and_then(|a| a.current_session.as_ref())
    }
}
