//! Fleet-wide runtime settings with documented defaults.

use serde::{Deserialize, Serialize};

/// Fleet-wide settings. Every field has a documented default so partial
/// persisted blobs and partial `update_settings` payloads both resolve
/// deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// How often agents run their monitor scripts, in milliseconds.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
    /// Warning-ladder thresholds in minutes before enforcement.
    #[serde(default = "default_warning_times")]
    pub warning_times: Vec<u32>,
    /// Seconds between the time-up warning and the logout action.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u32,
    /// Stop counting computer time while the session is idle.
    #[serde(default = "default_true")]
    pub pause_on_idle: bool,
    /// Kill processes that match a blocklist (false = warn only).
    #[serde(default = "default_true")]
    pub kill_on_violation: bool,
    /// Emit UI events for violations.
    #[serde(default = "default_true")]
    pub notify_parent: bool,
    /// Session idle threshold in milliseconds.
    #[serde(default = "default_idle_threshold_ms")]
    pub idle_threshold_ms: u64,
    /// Fixed offset, in minutes, applied when interpreting agents' local
    /// time (daily rollover, bedtime, schedules).
    #[serde(default)]
    pub tz_offset_minutes: i32,
}

fn default_monitor_interval_ms() -> u64 {
    30_000
}

fn default_warning_times() -> Vec<u32> {
    vec![15, 5, 1]
}

fn default_grace_period_secs() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_idle_threshold_ms() -> u64 {
    300_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            monitor_interval_ms: default_monitor_interval_ms(),
            warning_times: default_warning_times(),
            grace_period_secs: default_grace_period_secs(),
            pause_on_idle: true,
            kill_on_violation: true,
            notify_parent: true,
            idle_threshold_ms: default_idle_threshold_ms(),
            tz_offset_minutes: 0,
        }
    }
}

impl Settings {
    /// The telemetry report interval as a chrono duration.
    pub fn report_interval(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.monitor_interval_ms as i64)
    }
}

/// Partial settings update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_times: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_on_idle: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_on_violation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_parent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_threshold_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz_offset_minutes: Option<i32>,
}

impl Settings {
    /// Apply a partial update in place. Returns whether `monitor_interval_ms`
    /// changed, which requires redeploying every agent's monitors.
    pub fn apply(&mut self, patch: SettingsPatch) -> bool {
        let mut interval_changed = false;
        if let Some(interval) = patch.monitor_interval_ms {
            interval_changed = interval != self.monitor_interval_ms;
            self.monitor_interval_ms = interval;
        }
        if let Some(times) = patch.warning_times {
            self.warning_times = times;
        }
        if let Some(grace) = patch.grace_period_secs {
            self.grace_period_secs = grace;
        }
        if let Some(v) = patch.pause_on_idle {
            self.pause_on_idle = v;
        }
        if let Some(v) = patch.kill_on_violation {
            self.kill_on_violation = v;
        }
        if let Some(v) = patch.notify_parent {
            self.notify_parent = v;
        }
        if let Some(v) = patch.idle_threshold_ms {
            self.idle_threshold_ms = v;
        }
        if let Some(v) = patch.tz_offset_minutes {
            self.tz_offset_minutes = v;
        }
        interval_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.monitor_interval_ms, 30_000);
        assert_eq!(settings.warning_times, vec![15, 5, 1]);
        assert_eq!(settings.grace_period_secs, 60);
        assert!(settings.pause_on_idle);
        assert!(settings.kill_on_violation);
        assert!(settings.notify_parent);
        assert_eq!(settings.idle_threshold_ms, 300_000);
        assert_eq!(settings.tz_offset_minutes, 0);
    }

    #[test]
    fn empty_json_loads_full_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn apply_reports_interval_change() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            monitor_interval_ms: Some(15_000),
            ..Default::default()
        };
        assert!(settings.apply(patch));
        assert_eq!(settings.monitor_interval_ms, 15_000);

        // Same value again: no redeploy needed.
        let patch = SettingsPatch {
            monitor_interval_ms: Some(15_000),
            grace_period_secs: Some(30),
            ..Default::default()
        };
        assert!(!settings.apply(patch));
        assert_eq!(settings.grace_period_secs, 30);
    }
}
