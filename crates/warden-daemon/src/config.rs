//! Daemon configuration, loaded from `warden.toml`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use warden_quota::QuotaEndpoint;
use warden_types::WardenError;

/// Base directory for sockets, state, and the PID file.
pub fn warden_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".warden")
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket of the external agent-hub service.
    #[serde(default = "default_gateway_socket")]
    pub gateway_socket: PathBuf,
    /// Unix socket the control API listens on.
    #[serde(default = "default_control_socket")]
    pub control_socket: PathBuf,
    /// Where the persisted state blob lives.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// PID file for single-instance enforcement.
    #[serde(default = "default_pid_path")]
    pub pid_path: PathBuf,
    /// Quota/permission service endpoint.
    pub quota: QuotaEndpoint,
    /// Supervisor tick interval in milliseconds (timer resolution).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Interval between periodic state autosaves, in seconds.
    #[serde(default = "default_autosave_secs")]
    pub autosave_secs: u64,
}

fn default_gateway_socket() -> PathBuf {
    warden_dir().join("hub.sock")
}

fn default_control_socket() -> PathBuf {
    warden_dir().join("control.sock")
}

fn default_state_path() -> PathBuf {
    warden_dir().join("state.json")
}

fn default_pid_path() -> PathBuf {
    warden_dir().join("warden.pid")
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_autosave_secs() -> u64 {
    60
}

impl DaemonConfig {
    /// Parse from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, WardenError> {
        toml::from_str(content).map_err(|e| WardenError::InvalidConfig(e.to_string()))
    }

    /// Load from a file path.
    pub fn load(path: &std::path::Path) -> Result<Self, WardenError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WardenError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }
}
