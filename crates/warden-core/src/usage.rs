//! Idle-aware usage accounting.
//!
//! One cell per (agent, child, activity). Cells advance only when telemetry
//! arrives; the accountant owns no timers. Elapsed time between reports is
//! clamped to twice the report interval so a lost batch of telemetry never
//! credits hours of usage, and cells reset on the first advance past local
//! midnight.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use warden_types::{Activity, AgentId, ChildId};

use crate::localtime::local_date;

/// Accumulated usage for one (agent, child, activity).
#[derive(Debug, Clone, Default)]
pub struct UsageCell {
    pub accumulated_secs: u64,
    pub last_advance_at: Option<DateTime<Utc>>,
    /// Warning-ladder thresholds already emitted today, in minutes.
    pub warnings_fired: BTreeSet<u32>,
}

/// All usage cells.
#[derive(Debug, Default)]
pub struct UsageAccountant {
    cells: HashMap<(AgentId, ChildId, Activity), UsageCell>,
}

impl UsageAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance one cell to `now`.
    ///
    /// `count` is the activity's counting rule, already evaluated by the
    /// caller (idle gating for computer, browsers-open gating for internet).
    /// Returns the seconds credited, zero when not counting.
    pub fn advance(
        &mut self,
        agent: &AgentId,
        child: &ChildId,
        activity: Activity,
        now: DateTime<Utc>,
        count: bool,
        report_interval_ms: u64,
        tz_offset_minutes: i32,
    ) -> u64 {
        let cell = self
            .cells
            .entry((agent.clone(), child.clone(), activity))
            .or_default();

        // Daily rollover before any accumulation. The straddling interval
        // is discarded entirely: the first report of a new day starts the
        // day at zero.
        if let Some(last) = cell.last_advance_at {
            if local_date(now, tz_offset_minutes) != local_date(last, tz_offset_minutes) {
                cell.accumulated_secs = 0;
                cell.warnings_fired.clear();
                cell.last_advance_at = None;
            }
        }

        let credited = match cell.last_advance_at {
            Some(last) => {
                let elapsed = (now - last).num_seconds().max(0) as u64;
                let cap = 2 * report_interval_ms / 1000;
                let elapsed = elapsed.min(cap);
                if count {
                    cell.accumulated_secs += elapsed;
                    elapsed
                } else {
                    0
                }
            }
            // First report: nothing to credit yet.
            None => 0,
        };

        cell.last_advance_at = Some(now);
        credited
    }

    pub fn cell(&self, agent: &AgentId, child: &ChildId, activity: Activity) -> Option<&UsageCell> {
        self.cells.get(&(agent.clone(), child.clone(), activity))
    }

    /// Record that a warning threshold fired today. Returns `false` when it
    /// had already fired (the warning must be suppressed).
    pub fn mark_warning_fired(
        &mut self,
        agent: &AgentId,
        child: &ChildId,
        activity: Activity,
        threshold_minutes: u32,
    ) -> bool {
        self.cells
            .entry((agent.clone(), child.clone(), activity))
            .or_default()
            .warnings_fired
            .insert(threshold_minutes)
    }

    pub fn accumulated_secs(&self, agent: &AgentId, child: &ChildId, activity: Activity) -> u64 {
        self.cell(agent, child, activity)
            .map(|c| c.accumulated_secs)
            .unwrap_or(0)
    }

    /// Drop every cell for an agent (unlink).
    pub fn forget_agent(&mut self, agent: &AgentId) {
        self.cells.retain(|(a, _, _), _| a != agent);
    }

    /// Clear fired warnings for every cell of a child. A service-side state
    /// change (a parent buying more time) starts a fresh ladder: thresholds
    /// fire again when recrossed.
    pub fn clear_warnings_for_child(&mut self, child: &ChildId) {
        for ((_, c, _), cell) in self.cells.iter_mut() {
            if c == child {
                cell.warnings_fired.clear();
            }
        }
    }
}
