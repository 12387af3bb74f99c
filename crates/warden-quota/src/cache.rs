//! TTL'd verdict cache implementing the stale-read rules.
//!
//! A verdict is *fresh* for 60 seconds after `as_of`. Within TTL a transport
//! failure is invisible to callers; beyond it, read surfaces get the old
//! verdict flagged stale and enforcement defers. A service-side state change
//! drops every verdict for that child.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use warden_types::{Activity, ChildId, QuotaVerdict};

/// How long a verdict stays authoritative after the service produced it.
pub const VERDICT_TTL_SECS: i64 = 60;

/// A cached verdict with its freshness at lookup time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CachedVerdict {
    /// Within TTL: usable for enforcement.
    Fresh(QuotaVerdict),
    /// Beyond TTL: read surfaces report it with `stale = true`; no *new*
    /// enforcement may be based on it.
    Stale(QuotaVerdict),
    /// Never seen (or invalidated).
    Missing,
}

impl CachedVerdict {
    /// The verdict regardless of freshness, if any.
    pub fn verdict(&self) -> Option<QuotaVerdict> {
        match self {
            CachedVerdict::Fresh(v) | CachedVerdict::Stale(v) => Some(*v),
            CachedVerdict::Missing => None,
        }
    }

    /// Usable for enforcement decisions.
    pub fn fresh(&self) -> Option<QuotaVerdict> {
        match self {
            CachedVerdict::Fresh(v) => Some(*v),
            _ => None,
        }
    }
}

/// Last-known verdicts per (child, activity).
#[derive(Debug, Default)]
pub struct VerdictCache {
    entries: HashMap<(ChildId, Activity), QuotaVerdict>,
    ttl: Option<Duration>,
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn ttl(&self) -> Duration {
        self.ttl
            .unwrap_or_else(|| Duration::seconds(VERDICT_TTL_SECS))
    }

    /// Override the TTL (tests).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Some(ttl),
        }
    }

    /// Store a verdict the service just produced.
    pub fn store(&mut self, child: &ChildId, activity: Activity, verdict: QuotaVerdict) {
        self.entries.insert((child.clone(), activity), verdict);
    }

    /// Look up the verdict for a pair, classifying freshness against `now`.
    pub fn lookup(&self, child: &ChildId, activity: Activity, now: DateTime<Utc>) -> CachedVerdict {
        match self.entries.get(&(child.clone(), activity)) {
            Some(verdict) if now - verdict.as_of <= self.ttl() => CachedVerdict::Fresh(*verdict),
            Some(verdict) => CachedVerdict::Stale(*verdict),
            None => CachedVerdict::Missing,
        }
    }

    /// Drop every verdict for a child (service-side state change).
    pub fn invalidate_child(&mut self, child: &ChildId) {
        self.entries.retain(|(c, _), _| c != child);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
