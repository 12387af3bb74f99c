//! Process telemetry shapes and snapshot categorization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::Platform;

/// Process-name fragments recognized as web browsers, matched
/// case-insensitively as substrings.
pub const BROWSER_PATTERNS: &[&str] = &[
    "chrome", "chromium", "firefox", "safari", "msedge", "edge", "opera", "brave", "vivaldi",
];

/// Whether a process name looks like a browser.
pub fn is_browser(name: &str) -> bool {
    let lower = name.to_lowercase();
    BROWSER_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Coarse application category, as classified by the process monitor script.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ProcessCategory {
    Games,
    Education,
    Productivity,
    Internet,
    #[default]
    Other,
}

/// One observed process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub category: ProcessCategory,
}

/// One observed browser process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserInfo {
    pub pid: u32,
    pub name: String,
    /// Normalized browser family name ("chrome", "firefox", ...).
    #[serde(default)]
    pub browser_name: Option<String>,
}

/// Per-category process counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    #[serde(default)]
    pub games: u32,
    #[serde(default)]
    pub education: u32,
    #[serde(default)]
    pub productivity: u32,
    #[serde(default)]
    pub internet: u32,
    #[serde(default)]
    pub other: u32,
}

/// A categorized point-in-time view of the processes on an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub at: DateTime<Utc>,
    pub processes: Vec<ProcessInfo>,
    /// Browser processes, from the script's report plus the control plane's
    /// own pattern match over the full process list.
    pub browsers: Vec<BrowserInfo>,
    pub summary: CategorySummary,
}

impl ProcessSnapshot {
    /// Whether any browser was observed. Gates internet-time accounting and
    /// internet quota checks.
    pub fn browsers_present(&self) -> bool {
        !self.browsers.is_empty()
    }
}

/// Wire payload produced by the `process` monitor script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayload {
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub platform: Platform,
    #[serde(default)]
    pub process_count: u32,
    #[serde(default)]
    pub browsers: Vec<WireBrowser>,
    #[serde(default)]
    pub browser_active: bool,
    #[serde(default)]
    pub processes: Vec<WireProcess>,
    #[serde(default)]
    pub summary: CategorySummary,
}

/// Browser entry as emitted by the script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBrowser {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub browser_name: Option<String>,
}

/// Process entry as emitted by the script. `path` and `browser_name` are
/// best-effort and platform-dependent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireProcess {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: ProcessCategory,
    #[serde(default)]
    pub browser_name: Option<String>,
}

impl From<ProcessPayload> for ProcessSnapshot {
    /// Build the categorized snapshot, supplementing the script's browser
    /// report with the control plane's own pattern match so a script that
    /// fails to classify (older probe versions) still gates internet time.
    fn from(payload: ProcessPayload) -> Self {
        let mut browsers: Vec<BrowserInfo> = payload
            .browsers
            .into_iter()
            .map(|b| BrowserInfo {
                pid: b.pid,
                name: b.name,
                browser_name: b.browser_name,
            })
            .collect();

        let processes: Vec<ProcessInfo> = payload
            .processes
            .into_iter()
            .map(|p| {
                if is_browser(&p.name) && !browsers.iter().any(|b| b.pid == p.pid) {
                    browsers.push(BrowserInfo {
                        pid: p.pid,
                        name: p.name.clone(),
                        browser_name: p.browser_name.clone(),
                    });
                }
                ProcessInfo {
                    pid: p.pid,
                    name: p.name,
                    category: p.category,
                }
            })
            .collect();

        Self {
            at: payload.timestamp,
            processes,
            browsers,
            summary: payload.summary,
        }
    }
}
