//! Static manifest of monitor and action script blobs.
//!
//! The blobs are pre-built, per-platform, best-effort probes. The control
//! plane never interprets their contents; it selects a blob by platform and
//! hands it to the gateway as data. A platform with no blob for a given
//! script simply doesn't get it deployed, and any action triggered there
//! reports `success = false`.

use warden_types::Platform;

use crate::{
    ActionDeployment, MonitorDeployment, ACTION_KILL, ACTION_LOCK, ACTION_LOGOUT, ACTION_WARN,
    MONITOR_PROCESS, MONITOR_SESSION,
};

/// One platform's blob for a script.
#[derive(Debug, Clone, Copy)]
pub struct ScriptSource {
    pub platform: Platform,
    pub blob: &'static str,
}

/// Manifest entry for a monitor script.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSpec {
    pub id: &'static str,
    pub sources: &'static [ScriptSource],
}

/// Manifest entry for an action script.
#[derive(Debug, Clone, Copy)]
pub struct ActionSpec {
    pub id: &'static str,
    pub sources: &'static [ScriptSource],
}

impl MonitorSpec {
    /// The blob for a platform, if one exists.
    pub fn blob_for(&self, platform: Platform) -> Option<&'static str> {
        self.sources
            .iter()
            .find(|s| s.platform == platform)
            .map(|s| s.blob)
    }

    /// Build the deployment request for one agent.
    pub fn deployment_for(&self, platform: Platform, interval_ms: u64) -> Option<MonitorDeployment> {
        self.blob_for(platform).map(|blob| MonitorDeployment {
            monitor_id: self.id.to_string(),
            script_blob: blob.to_string(),
            interval_ms,
            platforms: vec![platform],
        })
    }
}

impl ActionSpec {
    pub fn blob_for(&self, platform: Platform) -> Option<&'static str> {
        self.sources
            .iter()
            .find(|s| s.platform == platform)
            .map(|s| s.blob)
    }

    /// Build the deployment request for one agent.
    pub fn deployment_for(&self, platform: Platform) -> Option<ActionDeployment> {
        self.blob_for(platform).map(|blob| ActionDeployment {
            action_id: self.id.to_string(),
            script_blob: blob.to_string(),
            platforms: vec![platform],
        })
    }
}

const SESSION_WIN32: &str = r#"
$u = (Get-CimInstance Win32_ComputerSystem).UserName
$idle = [PInvoke.IdleTime]::GetIdleMilliseconds()
@{ timestamp = (Get-Date).ToUniversalTime().ToString('o'); hostname = $env:COMPUTERNAME;
   platform = 'win32'; username = ($u -split '\\')[-1]; sessionId = "$((Get-Process -Id $PID).SessionId)";
   idleTime = $idle; isIdle = ($idle -ge 300000); uptime = [Environment]::TickCount64 / 1000;
   systemUser = [string]::IsNullOrEmpty($u) } | ConvertTo-Json -Compress
"#;

const SESSION_DARWIN: &str = r#"
user=$(stat -f%Su /dev/console)
idle=$(ioreg -c IOHIDSystem | awk '/HIDIdleTime/ {print int($NF/1000000); exit}')
echo "{\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\",\"hostname\":\"$(hostname -s)\",\"platform\":\"darwin\",\"username\":\"$user\",\"idleTime\":${idle:-0},\"isIdle\":$([ ${idle:-0} -ge 300000 ] && echo true || echo false),\"uptime\":$(sysctl -n kern.boottime | awk '{print systime()-$4}' 2>/dev/null || echo 0),\"systemUser\":false}"
"#;

const SESSION_LINUX: &str = r#"
user=$(who | awk 'NR==1{print $1}')
idle=$(xprintidle 2>/dev/null || echo 0)
echo "{\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\",\"hostname\":\"$(hostname -s)\",\"platform\":\"linux\",\"username\":\"${user:-}\",\"sessionId\":\"${XDG_SESSION_ID:-}\",\"idleTime\":$idle,\"isIdle\":$([ "$idle" -ge 300000 ] && echo true || echo false),\"uptime\":$(awk '{print int($1)}' /proc/uptime),\"systemUser\":$([ -z "$user" ] && echo true || echo false)}"
"#;

const PROCESS_WIN32: &str = r#"
$procs = Get-Process | Select-Object Id, ProcessName, Path
$browsers = $procs | Where-Object { $_.ProcessName -match 'chrome|msedge|firefox|opera|brave' }
@{ timestamp = (Get-Date).ToUniversalTime().ToString('o'); hostname = $env:COMPUTERNAME; platform = 'win32';
   processCount = $procs.Count;
   browsers = @($browsers | ForEach-Object { @{ pid = $_.Id; name = $_.ProcessName; browserName = $_.ProcessName.ToLower() } });
   browserActive = ($browsers.Count -gt 0);
   processes = @($procs | ForEach-Object { @{ pid = $_.Id; name = $_.ProcessName; path = $_.Path; type = 'app'; category = 'other' } });
   summary = @{ games = 0; education = 0; productivity = 0; internet = $browsers.Count; other = $procs.Count - $browsers.Count }
} | ConvertTo-Json -Compress -Depth 4
"#;

const PROCESS_POSIX: &str = r#"
ps -axo pid=,comm= | awk -v host="$(hostname -s)" -v plat="$1" '
BEGIN { n = 0; b = 0 }
{
  n++; pid = $1; $1 = ""; name = substr($0, 2)
  gsub(/"/, "\\\"", name)
  lower = tolower(name)
  is_browser = (lower ~ /chrome|chromium|firefox|safari|opera|brave|vivaldi/)
  procs = procs (procs ? "," : "") "{\"pid\":" pid ",\"name\":\"" name "\",\"type\":\"app\",\"category\":\"other\"}"
  if (is_browser) { b++; brows = brows (brows ? "," : "") "{\"pid\":" pid ",\"name\":\"" name "\"}" }
}
END {
  printf "{\"timestamp\":\"%s\",\"hostname\":\"%s\",\"platform\":\"%s\",", strftime("%Y-%m-%dT%H:%M:%SZ", systime(), 1), host, plat
  printf "\"processCount\":%d,\"browsers\":[%s],\"browserActive\":%s,\"processes\":[%s],", n, brows, (b > 0 ? "true" : "false"), procs
  printf "\"summary\":{\"games\":0,\"education\":0,\"productivity\":0,\"internet\":%d,\"other\":%d}}\n", b, n - b
}'
"#;

const WARN_WIN32: &str = r#"
param($title, $message, $urgency)
try {
  if ($urgency -eq 'critical') { msg * /TIME:30 "$title`n$message" }
  else {
    [void][System.Reflection.Assembly]::LoadWithPartialName('System.Windows.Forms')
    $tip = New-Object System.Windows.Forms.NotifyIcon
    $tip.Icon = [System.Drawing.SystemIcons]::Warning; $tip.Visible = $true
    $tip.ShowBalloonTip(10000, $title, $message, 'Warning')
  }
  @{ success = $true; method = 'notify'; timestamp = (Get-Date).ToUniversalTime().ToString('o'); platform = 'win32' } | ConvertTo-Json -Compress
} catch {
  @{ success = $false; error = "$_"; platform = 'win32' } | ConvertTo-Json -Compress
}
"#;

const WARN_DARWIN: &str = r#"
title="$1"; message="$2"; urgency="$3"
if [ "$urgency" = "critical" ]; then
  osascript -e "display dialog \"$message\" with title \"$title\" buttons {\"OK\"} giving up after 30" >/dev/null 2>&1
else
  osascript -e "display notification \"$message\" with title \"$title\"" >/dev/null 2>&1
fi
[ $? -eq 0 ] && ok=true || ok=false
echo "{\"success\":$ok,\"method\":\"osascript\",\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\",\"platform\":\"darwin\"}"
"#;

const WARN_LINUX: &str = r#"
title="$1"; message="$2"; urgency="$3"
notify-send -u "${urgency:-normal}" "$title" "$message" 2>/dev/null || \
  wall "$title: $message" 2>/dev/null
[ $? -eq 0 ] && ok=true || ok=false
echo "{\"success\":$ok,\"method\":\"notify-send\",\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\",\"platform\":\"linux\"}"
"#;

const KILL_WIN32: &str = r#"
param($pid, $name, $reason)
try {
  Stop-Process -Id $pid -Force -ErrorAction Stop
  @{ success = $true; pid = $pid; name = $name; reason = $reason; platform = 'win32'; timestamp = (Get-Date).ToUniversalTime().ToString('o') } | ConvertTo-Json -Compress
} catch {
  @{ success = $false; pid = $pid; error = "$_"; platform = 'win32' } | ConvertTo-Json -Compress
}
"#;

const KILL_POSIX: &str = r#"
pid="$1"; name="$2"; reason="$3"
if kill -TERM "$pid" 2>/dev/null; then
  sleep 2; kill -KILL "$pid" 2>/dev/null
  ok=true
else
  ok=false
fi
echo "{\"success\":$ok,\"pid\":$pid,\"name\":\"$name\",\"reason\":\"$reason\",\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\"}"
"#;

const LOCK_WIN32: &str = r#"
rundll32.exe user32.dll,LockWorkStation
@{ success = $?; method = 'rundll32'; platform = 'win32'; timestamp = (Get-Date).ToUniversalTime().ToString('o') } | ConvertTo-Json -Compress
"#;

const LOCK_DARWIN: &str = r#"
pmset displaysleepnow && ok=true || ok=false
echo "{\"success\":$ok,\"method\":\"pmset\",\"platform\":\"darwin\",\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\"}"
"#;

const LOCK_LINUX: &str = r#"
loginctl lock-session 2>/dev/null || xdg-screensaver lock 2>/dev/null
[ $? -eq 0 ] && ok=true || ok=false
echo "{\"success\":$ok,\"method\":\"loginctl\",\"platform\":\"linux\",\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\"}"
"#;

const LOGOUT_WIN32: &str = r#"
param($reason)
shutdown /l /f
@{ success = $?; reason = $reason; method = 'shutdown'; platform = 'win32'; timestamp = (Get-Date).ToUniversalTime().ToString('o') } | ConvertTo-Json -Compress
"#;

const LOGOUT_DARWIN: &str = r#"
reason="$1"
osascript -e 'tell application "System Events" to log out' >/dev/null 2>&1 && ok=true || ok=false
echo "{\"success\":$ok,\"reason\":\"$reason\",\"method\":\"osascript\",\"platform\":\"darwin\",\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\"}"
"#;

const LOGOUT_LINUX: &str = r#"
reason="$1"
session=$(loginctl list-sessions --no-legend | awk 'NR==1{print $1}')
loginctl terminate-session "$session" 2>/dev/null && ok=true || ok=false
echo "{\"success\":$ok,\"reason\":\"$reason\",\"method\":\"loginctl\",\"platform\":\"linux\",\"timestamp\":\"$(date -u +%Y-%m-%dT%H:%M:%SZ)\"}"
"#;

/// The two monitors every managed agent runs.
pub const MONITORS: &[MonitorSpec] = &[
    MonitorSpec {
        id: MONITOR_SESSION,
        sources: &[
            ScriptSource { platform: Platform::Win32, blob: SESSION_WIN32 },
            ScriptSource { platform: Platform::Darwin, blob: SESSION_DARWIN },
            ScriptSource { platform: Platform::Linux, blob: SESSION_LINUX },
        ],
    },
    MonitorSpec {
        id: MONITOR_PROCESS,
        sources: &[
            ScriptSource { platform: Platform::Win32, blob: PROCESS_WIN32 },
            ScriptSource { platform: Platform::Darwin, blob: PROCESS_POSIX },
            ScriptSource { platform: Platform::Linux, blob: PROCESS_POSIX },
        ],
    },
];

/// The four actions every managed agent carries.
pub const ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        id: ACTION_WARN,
        sources: &[
            ScriptSource { platform: Platform::Win32, blob: WARN_WIN32 },
            ScriptSource { platform: Platform::Darwin, blob: WARN_DARWIN },
            ScriptSource { platform: Platform::Linux, blob: WARN_LINUX },
        ],
    },
    ActionSpec {
        id: ACTION_KILL,
        sources: &[
            ScriptSource { platform: Platform::Win32, blob: KILL_WIN32 },
            ScriptSource { platform: Platform::Darwin, blob: KILL_POSIX },
            ScriptSource { platform: Platform::Linux, blob: KILL_POSIX },
        ],
    },
    ActionSpec {
        id: ACTION_LOCK,
        sources: &[
            ScriptSource { platform: Platform::Win32, blob: LOCK_WIN32 },
            ScriptSource { platform: Platform::Darwin, blob: LOCK_DARWIN },
            ScriptSource { platform: Platform::Linux, blob: LOCK_LINUX },
        ],
    },
    ActionSpec {
        id: ACTION_LOGOUT,
        sources: &[
            ScriptSource { platform: Platform::Win32, blob: LOGOUT_WIN32 },
            ScriptSource { platform: Platform::Darwin, blob: LOGOUT_DARWIN },
            ScriptSource { platform: Platform::Linux, blob: LOGOUT_LINUX },
        ],
    },
];

/// Look up a monitor spec by id.
pub fn monitor(id: &str) -> Option<&'static MonitorSpec> {
    MONITORS.iter().find(|m| m.id == id)
}

/// Look up an action spec by id.
pub fn action(id: &str) -> Option<&'static ActionSpec> {
    ACTIONS.iter().find(|a| a.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_monitor_covers_every_platform() {
        for spec in MONITORS {
            for platform in [Platform::Win32, Platform::Darwin, Platform::Linux] {
                assert!(
                    spec.blob_for(platform).is_some(),
                    "monitor {} missing blob for {platform}",
                    spec.id
                );
            }
        }
    }

    #[test]
    fn every_action_covers_every_platform() {
        for spec in ACTIONS {
            for platform in [Platform::Win32, Platform::Darwin, Platform::Linux] {
                assert!(
                    spec.blob_for(platform).is_some(),
                    "action {} missing blob for {platform}",
                    spec.id
                );
            }
        }
    }

    #[test]
    fn deployment_carries_platform_and_interval() {
        let spec = monitor(MONITOR_SESSION).unwrap();
        let deployment = spec.deployment_for(Platform::Linux, 30_000).unwrap();
        assert_eq!(deployment.monitor_id, "session");
        assert_eq!(deployment.interval_ms, 30_000);
        assert_eq!(deployment.platforms, vec![Platform::Linux]);
        assert!(!deployment.script_blob.is_empty());
    }

    #[test]
    fn manifest_lookup_by_id() {
        assert!(monitor("session").is_some());
        assert!(monitor("nope").is_none());
        assert!(action("logout").is_some());
        assert!(action("reboot").is_none());
    }
}
