//! Shared fixtures for the end-to-end scenario replays.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use warden::core::Supervisor;
use warden::gateway::{
    loopback, GatewayEvent, LoopbackGateway, LoopbackHandle, ACTION_KILL, ACTION_LOGOUT,
    ACTION_WARN, MONITOR_PROCESS, MONITOR_SESSION,
};
use warden::quota::{QuotaClient, QuotaError};
use warden::types::{
    Activity, Agent, AgentId, ChildId, PersistedState, Platform, QuotaVerdict, Settings,
};

/// Parse a fixed timestamp.
pub fn at(s: &str) -> DateTime<Utc> {
    s.parse().expect("valid test timestamp")
}

#[derive(Default)]
struct QuotaScript {
    current: HashMap<(ChildId, Activity), QuotaVerdict>,
    calls: usize,
    fail: bool,
}

/// Scripted quota service: tests set the verdict per (child, activity);
/// `check` returns it, counting calls. Unset pairs default to a generous
/// allowance so unrelated passes stay quiet.
#[derive(Clone, Default)]
pub struct ScriptedQuota {
    inner: Arc<Mutex<QuotaScript>>,
}

impl ScriptedQuota {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, child: &ChildId, activity: Activity, verdict: QuotaVerdict) {
        self.inner
            .lock()
            .expect("quota script lock")
            .current
            .insert((child.clone(), activity), verdict);
    }

    /// Allowed verdict with the given remaining seconds, stamped `as_of`.
    pub fn set_remaining(
        &self,
        child: &ChildId,
        activity: Activity,
        remaining_secs: i64,
        as_of: DateTime<Utc>,
    ) {
        self.set(
            child,
            activity,
            QuotaVerdict {
                allowed: true,
                banned: false,
                remaining_secs,
                as_of,
            },
        );
    }

    pub fn set_banned(&self, child: &ChildId, activity: Activity, as_of: DateTime<Utc>) {
        self.set(
            child,
            activity,
            QuotaVerdict {
                allowed: false,
                banned: true,
                remaining_secs: 0,
                as_of,
            },
        );
    }

    /// Make every check fail with `Unavailable`.
    pub fn set_unavailable(&self, fail: bool) {
        self.inner.lock().expect("quota script lock").fail = fail;
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().expect("quota script lock").calls
    }
}

#[async_trait]
impl QuotaClient for ScriptedQuota {
    async fn check(&self, child: &ChildId, activity: Activity) -> Result<QuotaVerdict, QuotaError> {
        let mut inner = self.inner.lock().expect("quota script lock");
        inner.calls += 1;
        if inner.fail {
            return Err(QuotaError::Unavailable("scripted outage".into()));
        }
        Ok(inner
            .current
            .get(&(child.clone(), activity))
            .copied()
            .unwrap_or(QuotaVerdict {
                allowed: true,
                banned: false,
                remaining_secs: 86_400,
                as_of: "2000-01-01T00:00:00Z".parse().expect("constant timestamp"),
            }))
    }
}

/// One agent, one child, a loopback gateway, and a scripted quota service.
pub struct Harness {
    pub supervisor: Supervisor<LoopbackGateway, ScriptedQuota>,
    pub handle: LoopbackHandle,
    pub events: mpsc::Receiver<GatewayEvent>,
    pub quota: ScriptedQuota,
    pub agent: AgentId,
    pub child: ChildId,
}

impl Harness {
    /// Build and start the harness at `start`, agent already linked to the
    /// child and recorded actions cleared.
    pub async fn new(start: DateTime<Utc>, settings: Settings) -> Self {
        let (gateway, handle, events) = loopback();
        let agent = AgentId::new("a1");
        let child = ChildId::new("c1");
        handle.add_agent(Agent::discovered(
            agent.clone(),
            "den-pc",
            Platform::Linux,
            start,
        ));

        let quota = ScriptedQuota::new();
        let state = PersistedState {
            settings,
            ..Default::default()
        };
        let mut supervisor = Supervisor::new(gateway, quota.clone(), state);
        supervisor.start(start).await.expect("gateway reachable");

        let response = supervisor
            .handle_command(
                warden::control::ControlCommand::LinkAgent {
                    agent: agent.clone(),
                    child: child.clone(),
                },
                start,
            )
            .await;
        assert!(response.ok, "link failed: {}", response.message);

        handle.clear_actions();
        Self {
            supervisor,
            handle,
            events,
            quota,
            agent,
            child,
        }
    }

    /// Deliver session telemetry for `username` at `now`.
    pub async fn session(&mut self, username: &str, now: DateTime<Utc>) {
        let payload = serde_json::json!({
            "timestamp": now,
            "hostname": "den-pc",
            "platform": "linux",
            "username": username,
            "sessionId": "console-1",
            "idleTime": 0,
            "isIdle": false,
            "uptime": 10_000,
            "systemUser": false,
        });
        self.supervisor
            .handle_gateway_event(
                GatewayEvent::Telemetry {
                    agent: self.agent.clone(),
                    monitor: MONITOR_SESSION.into(),
                    payload,
                },
                now,
            )
            .await;
    }

    /// Deliver process telemetry at `now`.
    pub async fn processes(
        &mut self,
        processes: &[(u32, &str)],
        browsers: &[(u32, &str)],
        now: DateTime<Utc>,
    ) {
        let payload = serde_json::json!({
            "timestamp": now,
            "hostname": "den-pc",
            "platform": "linux",
            "processCount": processes.len(),
            "browsers": browsers
                .iter()
                .map(|(pid, name)| serde_json::json!({"pid": pid, "name": name}))
                .collect::<Vec<_>>(),
            "browserActive": !browsers.is_empty(),
            "processes": processes
                .iter()
                .map(|(pid, name)| {
                    serde_json::json!({"pid": pid, "name": name, "type": "app", "category": "other"})
                })
                .collect::<Vec<_>>(),
            "summary": {"games": 0, "education": 0, "productivity": 0, "internet": 0, "other": processes.len()},
        });
        self.supervisor
            .handle_gateway_event(
                GatewayEvent::Telemetry {
                    agent: self.agent.clone(),
                    monitor: MONITOR_PROCESS.into(),
                    payload,
                },
                now,
            )
            .await;
    }

    /// Feed pending auto-ack action responses back into the supervisor.
    pub async fn pump_acks(&mut self, now: DateTime<Utc>) {
        while let Ok(event) = self.events.try_recv() {
            self.supervisor.handle_gateway_event(event, now).await;
        }
    }

    /// Recorded warn actions: (title, urgency) pairs, in order.
    pub fn warns(&self) -> Vec<(String, String)> {
        self.handle
            .actions()
            .into_iter()
            .filter(|a| a.action == ACTION_WARN)
            .map(|a| {
                (
                    a.args["title"].as_str().unwrap_or_default().to_string(),
                    a.args["urgency"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    /// Recorded warn messages, in order.
    pub fn warn_messages(&self) -> Vec<String> {
        self.handle
            .actions()
            .into_iter()
            .filter(|a| a.action == ACTION_WARN)
            .map(|a| a.args["message"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Recorded kill actions: pids, in order.
    pub fn kills(&self) -> Vec<u32> {
        self.handle
            .actions()
            .into_iter()
            .filter(|a| a.action == ACTION_KILL)
            .map(|a| a.args["pid"].as_u64().unwrap_or_default() as u32)
            .collect()
    }

    /// Recorded logout actions: reasons, in order.
    pub fn logouts(&self) -> Vec<String> {
        self.handle
            .actions()
            .into_iter()
            .filter(|a| a.action == ACTION_LOGOUT)
            .map(|a| a.args["reason"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}
