//! State blob storage and PID file management.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use warden_types::PersistedState;

/// File-backed store for the persisted state blob. Writes are atomic
/// (write tmp, then rename) so a crash mid-save never corrupts the blob.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Save the blob. Creates parent directories as needed.
    pub fn save(&self, state: &PersistedState) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create state dir: {e}"))?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| format!("failed to serialize state: {e}"))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json).map_err(|e| format!("failed to write state tmp: {e}"))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| format!("failed to rename state file: {e}"))?;

        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    /// Load the blob. A missing file yields the default (empty) state; a
    /// corrupt file is logged and treated as missing rather than blocking
    /// startup.
    pub fn load(&self) -> PersistedState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => {
                info!(path = %self.path.display(), "no state file, starting fresh");
                return PersistedState::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file unparseable, starting fresh");
                PersistedState::default()
            }
        }
    }
}

/// Write the daemon's PID file. Returns the path written.
pub fn write_pid_file(path: &Path) -> Result<PathBuf, String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create daemon dir: {e}"))?;
    }
    let pid = std::process::id();
    std::fs::write(path, pid.to_string()).map_err(|e| format!("failed to write PID file: {e}"))?;
    info!(pid, path = %path.display(), "daemon PID file written");
    Ok(path.to_path_buf())
}

/// Read the daemon PID from the PID file.
pub fn read_pid(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

/// Remove the daemon PID file.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!(error = %e, "failed to remove PID file (may not exist)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::{Agent, AgentId, Platform};

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let mut state = PersistedState::default();
        let id = AgentId::new("a1");
        state.agents.insert(
            id.clone(),
            Agent::discovered(id, "den-pc", Platform::Linux, chrono::Utc::now()),
        );
        state.settings.grace_period_secs = 90;

        store.save(&state).unwrap();
        let loaded = store.load();
        assert_eq!(loaded.agents.len(), 1);
        assert_eq!(loaded.settings.grace_period_secs, 90);
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("absent.json"));
        let state = store.load();
        assert!(state.agents.is_empty());
    }

    #[test]
    fn corrupt_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let state = StateStore::new(path).load();
        assert!(state.agents.is_empty());
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        StateStore::new(&path).save(&PersistedState::default()).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn pid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.pid");
        write_pid_file(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        remove_pid_file(&path);
        assert!(read_pid(&path).is_none());
    }
}
