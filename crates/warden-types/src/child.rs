//! Per-child configuration: caps, blocklists, bedtime, schedules, focus mode.

use std::collections::BTreeSet;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::process::ProcessCategory;

/// Day of week as written in configuration (`"mon"` .. `"sun"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Mon,
            Weekday::Tue => DayOfWeek::Tue,
            Weekday::Wed => DayOfWeek::Wed,
            Weekday::Thu => DayOfWeek::Thu,
            Weekday::Fri => DayOfWeek::Fri,
            Weekday::Sat => DayOfWeek::Sat,
            Weekday::Sun => DayOfWeek::Sun,
        }
    }
}

/// Serialize `NaiveTime` as `"HH:MM"`, accepting `"HH:MM"` or `"HH:MM:SS"`.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

/// Bedtime rule: a hard cutoff at a local time-of-day on selected days,
/// preceded by the warning ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedtimeRule {
    pub enabled: bool,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub days: BTreeSet<DayOfWeek>,
}

impl Default for BedtimeRule {
    fn default() -> Self {
        Self {
            enabled: false,
            time: NaiveTime::from_hms_opt(21, 0, 0).expect("valid constant time"),
            days: BTreeSet::new(),
        }
    }
}

/// A named time-of-day window with its own blocklist and category allowance.
///
/// While the window is open, a process matching `blocked_patterns` is killed
/// unless its category is in `allowed_categories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub name: String,
    pub days: BTreeSet<DayOfWeek>,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    #[serde(default)]
    pub allowed_categories: BTreeSet<ProcessCategory>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

impl DaySchedule {
    /// Whether the window is open at `time` on `day`. Start is inclusive,
    /// end exclusive.
    pub fn contains(&self, day: DayOfWeek, time: NaiveTime) -> bool {
        self.days.contains(&day) && self.start <= time && time < self.end
    }
}

/// Focus-mode profile: temporarily widens the blocked sets to cut
/// distraction. Applied per agent on parent command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusProfile {
    /// Desktop icon name patterns to hide (reserved for a future agent
    /// action; recorded but not yet sent).
    #[serde(default)]
    pub hide_icon_patterns: Vec<String>,
    #[serde(default)]
    pub blocked_categories: BTreeSet<ProcessCategory>,
    #[serde(default)]
    pub blocked_apps: Vec<String>,
}

/// Everything the control plane knows about one child.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildConfig {
    /// Daily computer-time cap in seconds; `None` = unlimited.
    #[serde(default)]
    pub computer_daily_cap_secs: Option<u32>,
    /// Daily internet-time cap in seconds; `None` = unlimited.
    #[serde(default)]
    pub internet_daily_cap_secs: Option<u32>,
    /// Ordered, case-insensitive substring patterns. First match wins.
    #[serde(default)]
    pub blocked_processes: Vec<String>,
    #[serde(default)]
    pub bedtime: BedtimeRule,
    #[serde(default)]
    pub schedules: Vec<DaySchedule>,
    #[serde(default)]
    pub focus_mode: Option<FocusProfile>,
}

/// Partial update for a child's configuration. `None` leaves the field
/// untouched; `Some` replaces it wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildConfigPatch {
    #[serde(default, with = "double_option", skip_serializing_if = "Option::is_none")]
    pub computer_daily_cap_secs: Option<Option<u32>>,
    #[serde(default, with = "double_option", skip_serializing_if = "Option::is_none")]
    pub internet_daily_cap_secs: Option<Option<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_processes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedtime: Option<BedtimeRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<Vec<DaySchedule>>,
    #[serde(default, with = "double_option", skip_serializing_if = "Option::is_none")]
    pub focus_mode: Option<Option<FocusProfile>>,
}

/// Distinguishes "field absent" from "field explicitly null" so a patch can
/// clear a nullable cap.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer, T: Serialize>(
        value: &Option<Option<T>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ok(Some(Option::deserialize(deserializer)?))
    }
}

impl ChildConfig {
    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: ChildConfigPatch) {
        if let Some(cap) = patch.computer_daily_cap_secs {
            self.computer_daily_cap_secs = cap;
        }
        if let Some(cap) = patch.internet_daily_cap_secs {
            self.internet_daily_cap_secs = cap;
        }
        if let Some(blocked) = patch.blocked_processes {
            self.blocked_processes = blocked;
        }
        if let Some(bedtime) = patch.bedtime {
            self.bedtime = bedtime;
        }
        if let Some(schedules) = patch.schedules {
            self.schedules = schedules;
        }
        if let Some(focus) = patch.focus_mode {
            self.focus_mode = focus;
        }
    }
}
