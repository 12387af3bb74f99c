//! Deterministic end-to-end replays of the enforcement scenarios.
//!
//! Every test drives the supervisor with explicit timestamps through the
//! loopback gateway and a scripted quota service; nothing sleeps and
//! nothing reads the wall clock.

mod common;

use chrono::Duration;

use common::{at, Harness};
use warden::control::ControlCommand;
use warden::core::EnforceState;
use warden::types::{Activity, Settings, ViolationKind};

/// S1: the quota warning ladder. Remaining time steps 900 -> 300 -> 60 -> 0
/// across four reports; each ladder threshold fires exactly once, the
/// exhaustion tick warns critically and schedules exactly one logout, and
/// the logout action runs when the grace elapses.
#[tokio::test]
async fn s1_quota_warning_ladder() {
    let mut h = Harness::new(at("2026-03-06T11:59:00Z"), Settings::default()).await;

    h.quota
        .set_remaining(&h.child, Activity::Computer, 900, at("2026-03-06T12:00:00Z"));
    h.session("emma", at("2026-03-06T12:00:00Z")).await;

    h.quota
        .set_remaining(&h.child, Activity::Computer, 300, at("2026-03-06T12:10:00Z"));
    h.session("emma", at("2026-03-06T12:10:00Z")).await;

    h.quota
        .set_remaining(&h.child, Activity::Computer, 60, at("2026-03-06T12:13:30Z"));
    h.session("emma", at("2026-03-06T12:13:30Z")).await;

    // 90 seconds later the cached verdict is past TTL, so the exhausted
    // reading reaches the planner.
    h.quota
        .set_remaining(&h.child, Activity::Computer, 0, at("2026-03-06T12:15:00Z"));
    h.session("emma", at("2026-03-06T12:15:00Z")).await;

    let warns = h.warns();
    assert_eq!(
        warns,
        vec![
            ("Time Running Out".to_string(), "normal".to_string()),
            ("Time Running Out".to_string(), "critical".to_string()),
            ("Time Running Out".to_string(), "critical".to_string()),
            ("Logging Out".to_string(), "critical".to_string()),
        ]
    );
    let messages = h.warn_messages();
    assert!(messages[0].contains("15 minutes"));
    assert!(messages[1].contains("5 minutes"));
    assert!(messages[2].contains("1 minutes"));
    assert!(messages[3].contains("computer time exhausted"));

    // Exactly one logout timer after tick 4.
    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 1);
    assert_eq!(
        h.supervisor.timer_table().logout_deadline(&h.agent),
        Some(at("2026-03-06T12:16:00Z"))
    );
    assert_eq!(h.supervisor.enforce_state(&h.agent), EnforceState::GracePending);
    assert!(h.logouts().is_empty());

    // Grace elapses: the logout action runs.
    h.supervisor.tick(at("2026-03-06T12:16:00Z")).await;
    assert_eq!(h.logouts(), vec!["computer time exhausted".to_string()]);
    assert_eq!(h.supervisor.enforce_state(&h.agent), EnforceState::LoggingOut);

    // Agent acks; the state machine returns to idle.
    h.pump_acks(at("2026-03-06T12:16:05Z")).await;
    assert_eq!(h.supervisor.enforce_state(&h.agent), EnforceState::Idle);
}

/// S2: a parent login never produces intents, and the quota service is
/// never consulted for it.
#[tokio::test]
async fn s2_parent_login_no_op() {
    let mut h = Harness::new(at("2026-03-06T11:59:00Z"), Settings::default()).await;
    let response = h
        .supervisor
        .handle_command(
            ControlCommand::SetParentAccounts {
                agent: h.agent.clone(),
                usernames: vec!["dad".into()],
            },
            at("2026-03-06T11:59:30Z"),
        )
        .await;
    assert!(response.ok);
    h.quota
        .set_remaining(&h.child, Activity::Computer, 0, at("2026-03-06T12:00:00Z"));

    // Ten minutes of session and process telemetry with browsers open.
    for i in 0..20 {
        let now = at("2026-03-06T12:00:00Z") + Duration::seconds(30 * i);
        h.session("dad", now).await;
        h.processes(&[(10, "chrome"), (20, "steam")], &[(10, "chrome")], now)
            .await;
    }

    assert!(h.handle.actions().is_empty());
    assert_eq!(h.quota.calls(), 0);
    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 0);
    // The session itself is tracked.
    assert_eq!(h.supervisor.current_session(&h.agent).unwrap().username, "dad");
}

/// S3: a blocked process is killed, warned about, and journaled once; a
/// re-observation within 30 seconds is suppressed.
#[tokio::test]
async fn s3_blocked_process() {
    let mut h = Harness::new(at("2026-03-06T11:59:00Z"), Settings::default()).await;
    h.supervisor
        .handle_command(
            ControlCommand::UpdateChildSettings {
                child: h.child.clone(),
                patch: serde_json::from_str(r#"{"blocked_processes": ["minecraft"]}"#).unwrap(),
            },
            at("2026-03-06T11:59:30Z"),
        )
        .await;
    h.session("emma", at("2026-03-06T11:59:30Z")).await;
    h.handle.clear_actions();

    h.processes(
        &[(42, "Minecraft.exe"), (7, "explorer")],
        &[],
        at("2026-03-06T12:00:00Z"),
    )
    .await;

    assert_eq!(h.kills(), vec![42]);
    let warns = h.warns();
    assert_eq!(warns.len(), 1);
    assert_eq!(warns[0].0, "Application Blocked");

    let blocked: Vec<_> = h
        .supervisor
        .journal()
        .violations(None)
        .into_iter()
        .filter(|v| v.kind == ViolationKind::BlockedProcess)
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].process_name.as_deref(), Some("Minecraft.exe"));

    // The kill ack appends a process_killed entry.
    h.pump_acks(at("2026-03-06T12:00:01Z")).await;
    assert!(h
        .supervisor
        .journal()
        .violations(None)
        .iter()
        .any(|v| v.kind == ViolationKind::ProcessKilled));

    // Re-observation within the window: suppressed.
    h.processes(&[(42, "Minecraft.exe")], &[], at("2026-03-06T12:00:20Z"))
        .await;
    assert_eq!(h.kills(), vec![42]);

    // Past the window: enforced again.
    h.processes(&[(42, "Minecraft.exe")], &[], at("2026-03-06T12:00:31Z"))
        .await;
    assert_eq!(h.kills(), vec![42, 42]);
}

/// S4: the bedtime ladder on a Friday evening, 30-second telemetry
/// cadence, logout at 21:00 and the action firing at 21:01.
#[tokio::test]
async fn s4_bedtime() {
    let mut h = Harness::new(at("2026-03-06T20:44:00Z"), Settings::default()).await;
    h.supervisor
        .handle_command(
            ControlCommand::UpdateChildSettings {
                child: h.child.clone(),
                patch: serde_json::from_str(
                    r#"{"bedtime": {"enabled": true, "time": "21:00", "days": ["fri"]}}"#,
                )
                .unwrap(),
            },
            at("2026-03-06T20:44:00Z"),
        )
        .await;

    // Telemetry every 30 seconds from 20:45 through 21:00.
    let mut now = at("2026-03-06T20:45:00Z");
    let end = at("2026-03-06T21:00:00Z");
    while now <= end {
        h.session("emma", now).await;
        now += Duration::seconds(30);
    }

    let warns = h.warns();
    assert_eq!(
        warns,
        vec![
            ("Bedtime Soon".to_string(), "normal".to_string()),
            ("Bedtime Soon".to_string(), "critical".to_string()),
            ("Bedtime Soon".to_string(), "critical".to_string()),
            ("Logging Out".to_string(), "critical".to_string()),
        ]
    );
    let messages = h.warn_messages();
    assert!(messages[0].contains("15 minutes"));
    assert!(messages[1].contains("5 minutes"));
    assert!(messages[2].contains("1 minutes"));
    assert!(messages[3].contains("bedtime"));

    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 1);
    assert_eq!(
        h.supervisor.timer_table().logout_deadline(&h.agent),
        Some(at("2026-03-06T21:01:00Z"))
    );

    // Continued telemetry past the cutoff does not double-schedule.
    h.session("emma", at("2026-03-06T21:00:30Z")).await;
    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 1);
    assert_eq!(h.warns().len(), 4);

    h.supervisor.tick(at("2026-03-06T21:01:00Z")).await;
    assert_eq!(h.logouts(), vec!["bedtime".to_string()]);
    assert!(h
        .supervisor
        .journal()
        .violations(None)
        .iter()
        .any(|v| v.kind == ViolationKind::BedtimeEnforced));
}

/// S5: a quota state change (parent buys more time) during the grace
/// period cancels the pending logout; the ladder re-fires only when its
/// thresholds are recrossed.
#[tokio::test]
async fn s5_override_cancels_logout() {
    let mut h = Harness::new(at("2026-03-06T11:59:00Z"), Settings::default()).await;

    // Reach the exhausted state (S1 tick 4 shape).
    h.quota
        .set_remaining(&h.child, Activity::Computer, 900, at("2026-03-06T12:00:00Z"));
    h.session("emma", at("2026-03-06T12:00:00Z")).await;
    h.quota
        .set_remaining(&h.child, Activity::Computer, 0, at("2026-03-06T12:15:00Z"));
    h.session("emma", at("2026-03-06T12:15:00Z")).await;
    assert_eq!(h.supervisor.enforce_state(&h.agent), EnforceState::GracePending);
    assert_eq!(
        h.supervisor.timer_table().logout_deadline(&h.agent),
        Some(at("2026-03-06T12:16:00Z"))
    );

    // The service grants 30 minutes; the change event lands mid-grace.
    h.quota
        .set_remaining(&h.child, Activity::Computer, 1800, at("2026-03-06T12:15:30Z"));
    h.supervisor
        .handle_quota_change(&h.child, at("2026-03-06T12:15:30Z"))
        .await;

    // The grace logout is gone; what remains is the depletion forecast for
    // the new allowance.
    assert_eq!(h.supervisor.enforce_state(&h.agent), EnforceState::Idle);
    assert_eq!(
        h.supervisor.timer_table().logout_deadline(&h.agent),
        Some(at("2026-03-06T12:45:30Z"))
    );

    // The old grace deadline passes without a logout.
    h.handle.clear_actions();
    h.supervisor.tick(at("2026-03-06T12:16:00Z")).await;
    assert!(h.logouts().is_empty());
    assert!(h.warns().is_empty());

    // No warnings fire until a threshold is recrossed...
    h.quota
        .set_remaining(&h.child, Activity::Computer, 1700, at("2026-03-06T12:17:00Z"));
    h.session("emma", at("2026-03-06T12:17:00Z")).await;
    assert!(h.warns().is_empty());

    // ...then the fresh ladder fires again.
    h.quota
        .set_remaining(&h.child, Activity::Computer, 900, at("2026-03-06T12:30:30Z"));
    h.session("emma", at("2026-03-06T12:30:30Z")).await;
    let warns = h.warns();
    assert_eq!(warns, vec![("Time Running Out".to_string(), "normal".to_string())]);
}

/// S6: a telemetry gap cancels per-agent timers, then flags the agent
/// offline; on return the planner re-evaluates from a fresh verdict.
#[tokio::test]
async fn s6_agent_offline_online() {
    let settings = Settings {
        monitor_interval_ms: 15_000,
        ..Default::default()
    };
    let mut h = Harness::new(at("2026-03-06T12:59:00Z"), settings).await;

    // Exhausted quota arms a grace logout at 13:01:00.
    h.quota
        .set_remaining(&h.child, Activity::Computer, 0, at("2026-03-06T13:00:00Z"));
    h.session("emma", at("2026-03-06T13:00:00Z")).await;
    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 1);

    // Telemetry stops. Two missed intervals: timers cancelled.
    h.supervisor.tick(at("2026-03-06T13:00:31Z")).await;
    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 0);
    assert!(h.supervisor.agent(&h.agent).unwrap().online);

    // Three missed intervals: flagged offline.
    h.supervisor.tick(at("2026-03-06T13:00:46Z")).await;
    assert!(!h.supervisor.agent(&h.agent).unwrap().online);

    // The old grace deadline passes silently.
    h.supervisor.tick(at("2026-03-06T13:01:10Z")).await;
    assert!(h.logouts().is_empty());

    // The agent returns; the planner re-evaluates from a fresh verdict.
    h.handle.clear_actions();
    h.quota
        .set_remaining(&h.child, Activity::Computer, 900, at("2026-03-06T13:02:00Z"));
    h.supervisor
        .handle_gateway_event(
            warden::gateway::GatewayEvent::Online {
                agent: h.agent.clone(),
            },
            at("2026-03-06T13:02:00Z"),
        )
        .await;

    assert!(h.supervisor.agent(&h.agent).unwrap().online);
    let warns = h.warns();
    assert_eq!(warns, vec![("Time Running Out".to_string(), "normal".to_string())]);
}

/// The quota service is authoritative: a ban produces a logout and nothing
/// else interleaves before it.
#[tokio::test]
async fn banned_child_gets_logout_first() {
    let mut h = Harness::new(at("2026-03-06T11:59:00Z"), Settings::default()).await;
    h.quota
        .set_banned(&h.child, Activity::Computer, at("2026-03-06T12:00:00Z"));

    h.session("emma", at("2026-03-06T12:00:00Z")).await;

    let actions = h.handle.actions();
    assert!(!actions.is_empty());
    assert_eq!(actions[0].action, warden::gateway::ACTION_WARN);
    assert_eq!(actions[0].args["title"], "Logging Out");
    assert!(actions[0].args["message"]
        .as_str()
        .unwrap()
        .contains("access blocked"));
    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 1);
}

/// Internet quota: browsers open plus a disallowed internet verdict blocks
/// the browsers.
#[tokio::test]
async fn disallowed_internet_blocks_browsers() {
    let mut h = Harness::new(at("2026-03-06T11:59:00Z"), Settings::default()).await;
    h.quota.set(
        &h.child,
        Activity::Internet,
        warden::types::QuotaVerdict {
            allowed: false,
            banned: false,
            remaining_secs: 0,
            as_of: at("2026-03-06T12:00:00Z"),
        },
    );
    h.session("emma", at("2026-03-06T11:59:30Z")).await;
    h.handle.clear_actions();

    h.processes(
        &[(10, "chrome"), (7, "explorer")],
        &[(10, "chrome")],
        at("2026-03-06T12:00:00Z"),
    )
    .await;

    assert_eq!(h.kills(), vec![10]);
    assert!(h.warns().iter().any(|(title, _)| title == "Internet Blocked"));
    assert!(h
        .supervisor
        .journal()
        .violations(None)
        .iter()
        .any(|v| v.kind == ViolationKind::BrowsersBlocked));
}

/// Stale-verdict rules: an outage defers new enforcement, but an
/// already-armed logout timer still fires.
#[tokio::test]
async fn quota_outage_defers_but_armed_timers_fire() {
    let mut h = Harness::new(at("2026-03-06T11:59:00Z"), Settings::default()).await;

    // Outage from the start: no verdict, no enforcement.
    h.quota.set_unavailable(true);
    h.session("emma", at("2026-03-06T12:00:00Z")).await;
    assert!(h.handle.actions().is_empty());
    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 0);

    // Service recovers and reports exhaustion: logout armed.
    h.quota.set_unavailable(false);
    h.quota
        .set_remaining(&h.child, Activity::Computer, 0, at("2026-03-06T12:01:00Z"));
    h.session("emma", at("2026-03-06T12:01:00Z")).await;
    assert_eq!(h.supervisor.timer_table().logout_count(&h.agent), 1);

    // Outage again: the armed timer still fires on schedule.
    h.quota.set_unavailable(true);
    h.supervisor.tick(at("2026-03-06T12:02:00Z")).await;
    assert_eq!(h.logouts(), vec!["computer time exhausted".to_string()]);
}

/// Usage accounting is monotone across in-order telemetry and visible
/// through the supervisor.
#[tokio::test]
async fn usage_accumulates_across_telemetry() {
    let mut h = Harness::new(at("2026-03-06T11:59:00Z"), Settings::default()).await;

    let mut previous = 0;
    for i in 0..10 {
        let now = at("2026-03-06T12:00:00Z") + Duration::seconds(30 * i);
        h.session("emma", now).await;
        let total = h
            .supervisor
            .accumulated_secs(&h.agent, &h.child, Activity::Computer);
        assert!(total >= previous);
        previous = total;
    }
    assert_eq!(previous, 270);
}
