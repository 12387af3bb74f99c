//! Quota-service verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Accountable activity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Computer,
    Internet,
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Activity::Computer => write!(f, "computer"),
            Activity::Internet => write!(f, "internet"),
        }
    }
}

/// The quota service's answer for one (child, activity) pair.
///
/// The service is authoritative: `banned` or `!allowed` overrides whatever
/// the local accountant has accumulated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaVerdict {
    pub allowed: bool,
    #[serde(default)]
    pub banned: bool,
    /// Seconds of the activity remaining today. May go negative when the
    /// service has already counted past the cap.
    pub remaining_secs: i64,
    pub as_of: DateTime<Utc>,
}

impl QuotaVerdict {
    /// Whether this verdict forbids the activity outright, regardless of
    /// remaining time.
    pub fn forbids(&self) -> bool {
        self.banned || !self.allowed
    }

    /// Remaining whole minutes, clamped at zero.
    pub fn remaining_minutes(&self) -> u32 {
        (self.remaining_secs.max(0) / 60) as u32
    }
}
