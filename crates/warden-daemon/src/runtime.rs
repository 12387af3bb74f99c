//! The daemon event loop.
//!
//! One `select!` loop drives the supervisor: gateway events (drained and
//! coalesced per agent), quota state changes, control commands, watch
//! subscribers, and the timer tick. Processing one event at a time is what
//! gives the per-agent ordering guarantee; only the gateway, quota HTTP,
//! and IPC awaits suspend.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use warden_control::{spawn_control_server, ControlCmdRx, SubscriberRx};
use warden_core::Supervisor;
use warden_gateway::{AgentGateway, GatewayEvent, SocketGateway, MONITOR_PROCESS, MONITOR_SESSION};
use warden_quota::{ChangePoller, HttpQuotaClient, QuotaClient, QuotaEvent};

use crate::config::DaemonConfig;
use crate::persistence::{remove_pid_file, write_pid_file, StateStore};

/// Run the daemon until shutdown. An unreachable gateway is fatal: the
/// daemon reports the error status and never enters the monitoring loop.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    write_pid_file(&config.pid_path).map_err(|e| anyhow::anyhow!(e))?;

    let store = StateStore::new(&config.state_path);
    let state = store.load();

    let (gateway, gateway_events) = match SocketGateway::connect(&config.gateway_socket).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, "status=error: agent gateway absent, refusing to start monitoring");
            remove_pid_file(&config.pid_path);
            return Err(anyhow::anyhow!("agent gateway unavailable: {e}"));
        }
    };

    let quota = HttpQuotaClient::new(config.quota.clone())
        .map_err(|e| anyhow::anyhow!("quota client: {e}"))?;
    let (quota_tx, quota_events) = mpsc::channel(64);
    let poller = ChangePoller::new(config.quota.clone())
        .map_err(|e| anyhow::anyhow!("quota poller: {e}"))?;
    tokio::spawn(poller.run(quota_tx));

    let (control_handle, commands, subscribers) = spawn_control_server(&config.control_socket)
        .map_err(|e| anyhow::anyhow!(e))?;

    let mut supervisor = Supervisor::new(gateway, quota, state);
    supervisor
        .start(Utc::now())
        .await
        .context("gateway probe failed")?;

    info!("warden daemon entering monitoring state");
    run_loop(
        &mut supervisor,
        gateway_events,
        quota_events,
        commands,
        subscribers,
        &store,
        &config,
    )
    .await;

    supervisor.shutdown().await;
    if let Err(e) = store.save(&supervisor.persisted_state(Utc::now())) {
        warn!(error = %e, "final state save failed");
    }
    drop(control_handle);
    remove_pid_file(&config.pid_path);
    info!("warden daemon stopped");
    Ok(())
}

/// The monitoring loop proper. Returns on shutdown signal or when the
/// gateway stream closes.
async fn run_loop<G: AgentGateway, Q: QuotaClient>(
    supervisor: &mut Supervisor<G, Q>,
    mut gateway_events: mpsc::Receiver<GatewayEvent>,
    mut quota_events: mpsc::Receiver<QuotaEvent>,
    mut commands: ControlCmdRx,
    mut subscribers: SubscriberRx,
    store: &StateStore,
    config: &DaemonConfig,
) {
    let mut tick = tokio::time::interval(Duration::from_millis(config.tick_interval_ms));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let autosave = Duration::from_secs(config.autosave_secs);
    let mut last_save = Instant::now();

    loop {
        tokio::select! {
            maybe_event = gateway_events.recv() => {
                let Some(first) = maybe_event else {
                    warn!("gateway event stream closed, shutting down");
                    return;
                };
                // Drain whatever is immediately available and coalesce
                // per-agent before processing.
                let mut batch = vec![first];
                while let Ok(more) = gateway_events.try_recv() {
                    batch.push(more);
                }
                for event in coalesce(batch) {
                    supervisor.handle_gateway_event(event, Utc::now()).await;
                }
            }

            Some(event) = quota_events.recv() => {
                let QuotaEvent::StateChanged { child } = event;
                supervisor.handle_quota_change(&child, Utc::now()).await;
            }

            Some((command, reply)) = commands.recv() => {
                let response = supervisor.handle_command(command, Utc::now()).await;
                let _ = reply.send(response);
                if supervisor.take_dirty() {
                    if let Err(e) = store.save(&supervisor.persisted_state(Utc::now())) {
                        warn!(error = %e, "state save failed");
                    }
                    last_save = Instant::now();
                }
            }

            Some(subscriber) = subscribers.recv() => {
                supervisor.add_ui_subscriber(subscriber);
            }

            _ = tick.tick() => {
                supervisor.tick(Utc::now()).await;
                if last_save.elapsed() >= autosave {
                    if let Err(e) = store.save(&supervisor.persisted_state(Utc::now())) {
                        warn!(error = %e, "autosave failed");
                    }
                    last_save = Instant::now();
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return;
            }
        }
    }
}

/// Coalesce a drained event batch.
///
/// Consecutive session updates per agent keep only the newest. Process
/// snapshots keep the newest, except that an older snapshot observing a
/// process absent from the newest is retained: the first detection of a
/// blocked process must never be dropped, and the matcher runs downstream
/// where the child's patterns are known.
pub fn coalesce(events: Vec<GatewayEvent>) -> Vec<GatewayEvent> {
    let mut keep = vec![true; events.len()];

    // Index of the newest telemetry per (agent, monitor).
    let newest: std::collections::HashMap<(String, String), usize> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            GatewayEvent::Telemetry { agent, monitor, .. } => {
                Some(((agent.to_string(), monitor.clone()), i))
            }
            _ => None,
        })
        .collect();

    for (i, event) in events.iter().enumerate() {
        let GatewayEvent::Telemetry {
            agent,
            monitor,
            payload,
        } = event
        else {
            continue;
        };
        let newest_index = newest[&(agent.to_string(), monitor.clone())];
        if i == newest_index {
            continue;
        }
        match monitor.as_str() {
            MONITOR_SESSION => keep[i] = false,
            MONITOR_PROCESS => {
                // Drop only if every process here is still visible in the
                // newest snapshot.
                let newest_names = match &events[newest_index] {
                    GatewayEvent::Telemetry { payload, .. } => process_names(payload),
                    _ => HashSet::new(),
                };
                if process_names(payload).is_subset(&newest_names) {
                    keep[i] = false;
                }
            }
            _ => {}
        }
    }

    events
        .into_iter()
        .zip(keep)
        .filter_map(|(event, kept)| kept.then_some(event))
        .collect()
}

fn process_names(payload: &serde_json::Value) -> HashSet<String> {
    payload["processes"]
        .as_array()
        .map(|processes| {
            processes
                .iter()
                .filter_map(|p| p["name"].as_str().map(str::to_lowercase))
                .collect()
        })
        .unwrap_or_default()
}
