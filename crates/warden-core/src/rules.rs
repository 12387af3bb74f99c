//! Schedule, blocklist, and bedtime evaluation over process snapshots.
//!
//! Three passes over each snapshot: the child's blocked-process patterns
//! (first match wins), any open time-of-day schedule windows, and the
//! bedtime cutoff with its warning ladder. An active focus profile widens
//! the blocked sets for the duration.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};

use warden_types::{
    AgentId, ChildConfig, EnforcementIntent, FocusProfile, ProcessSnapshot, Settings, Urgency,
    WarningSubject,
};

use crate::localtime::{local_date, local_day, local_time, seconds_until};

/// Bedtime warning thresholds, in minutes before the cutoff.
pub const BEDTIME_THRESHOLDS: &[u32] = &[15, 5, 1];

/// Per-agent bedtime ladder bookkeeping: which thresholds fired, and for
/// which local day.
#[derive(Debug, Clone, Default)]
pub struct BedtimeLadder {
    fired: BTreeSet<u32>,
    day: Option<NaiveDate>,
}

impl BedtimeLadder {
    /// Mark a threshold fired for `day`. Returns `false` if it already
    /// fired that day. A new day clears the set.
    fn mark(&mut self, day: NaiveDate, threshold: u32) -> bool {
        if self.day != Some(day) {
            self.day = Some(day);
            self.fired.clear();
        }
        self.fired.insert(threshold)
    }
}

/// Case-insensitive substring match, first pattern wins.
pub fn match_blocked_pattern<'a>(name: &str, patterns: &'a [String]) -> Option<&'a str> {
    let lower = name.to_lowercase();
    patterns
        .iter()
        .find(|p| lower.contains(&p.to_lowercase()))
        .map(|p| p.as_str())
}

/// Pass 1 and 2: blocked processes and schedule windows.
///
/// Returns `(intents, detections)` where detections are the (process name,
/// pattern) pairs for UI notification.
pub fn evaluate_snapshot(
    agent: &AgentId,
    snapshot: &ProcessSnapshot,
    child: &ChildConfig,
    focus: Option<&FocusProfile>,
    now: DateTime<Utc>,
    settings: &Settings,
) -> (Vec<EnforcementIntent>, Vec<(String, String)>) {
    let mut intents = Vec::new();
    let mut detections = Vec::new();

    // Focus mode widens the child's blocklist for the duration.
    let mut patterns: Vec<String> = child.blocked_processes.clone();
    if let Some(profile) = focus {
        patterns.extend(profile.blocked_apps.iter().cloned());
    }

    let day = local_day(now, settings.tz_offset_minutes);
    let time = local_time(now, settings.tz_offset_minutes);
    let open_schedules: Vec<_> = child
        .schedules
        .iter()
        .filter(|s| s.contains(day, time))
        .collect();

    for process in &snapshot.processes {
        // Blocked-process pass: first match wins, and a process already
        // matched here is not re-tested against schedules.
        if let Some(pattern) = match_blocked_pattern(&process.name, &patterns) {
            // The dispatcher pairs every kill with its own user-facing
            // warning, so the block intent stands alone here.
            intents.push(EnforcementIntent::BlockProcess {
                agent: agent.clone(),
                pid: process.pid,
                name: process.name.clone(),
                reason: format!("matches blocked pattern \"{pattern}\""),
            });
            detections.push((process.name.clone(), pattern.to_string()));
            continue;
        }

        // Focus-blocked categories count as blocked patterns while active.
        if let Some(profile) = focus {
            if profile.blocked_categories.contains(&process.category) {
                intents.push(EnforcementIntent::BlockProcess {
                    agent: agent.clone(),
                    pid: process.pid,
                    name: process.name.clone(),
                    reason: "category blocked during focus".into(),
                });
                detections.push((process.name.clone(), format!("{:?}", process.category)));
                continue;
            }
        }

        // Schedule pass: blocked within the window unless the category is
        // explicitly allowed.
        for schedule in &open_schedules {
            if schedule.allowed_categories.contains(&process.category) {
                continue;
            }
            if let Some(pattern) = match_blocked_pattern(&process.name, &schedule.blocked_patterns)
            {
                intents.push(EnforcementIntent::BlockProcess {
                    agent: agent.clone(),
                    pid: process.pid,
                    name: process.name.clone(),
                    reason: format!(
                        "blocked by schedule \"{}\" (pattern \"{pattern}\")",
                        schedule.name
                    ),
                });
                detections.push((process.name.clone(), pattern.to_string()));
                break;
            }
        }
    }

    (intents, detections)
}

/// Pass 3: bedtime cutoff and warning ladder.
pub fn evaluate_bedtime(
    agent: &AgentId,
    child: &ChildConfig,
    ladder: &mut BedtimeLadder,
    now: DateTime<Utc>,
    settings: &Settings,
) -> Vec<EnforcementIntent> {
    let bedtime = &child.bedtime;
    if !bedtime.enabled {
        return Vec::new();
    }
    let day = local_day(now, settings.tz_offset_minutes);
    if !bedtime.days.contains(&day) {
        return Vec::new();
    }

    let secs = seconds_until(now, bedtime.time, settings.tz_offset_minutes);
    if secs <= 0 {
        return vec![EnforcementIntent::Logout {
            agent: agent.clone(),
            reason: "bedtime".into(),
            grace_secs: settings.grace_period_secs,
        }];
    }

    // Ceiling minutes: 30 seconds out is still "1 minute left".
    let minutes = ((secs + 59) / 60) as u32;
    let date = local_date(now, settings.tz_offset_minutes);
    let mut intents = Vec::new();
    for &threshold in BEDTIME_THRESHOLDS {
        if minutes <= threshold && ladder.mark(date, threshold) {
            intents.push(EnforcementIntent::Warning {
                agent: agent.clone(),
                subject: WarningSubject::Bedtime,
                minutes_remaining: minutes,
                urgency: if threshold <= 5 {
                    Urgency::Critical
                } else {
                    Urgency::Normal
                },
            });
        }
    }
    intents
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use warden_types::{
        BedtimeRule, CategorySummary, DayOfWeek, DaySchedule, ProcessCategory, ProcessInfo,
    };

    fn agent() -> AgentId {
        AgentId::new("a1")
    }

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn snapshot(processes: Vec<(u32, &str)>) -> ProcessSnapshot {
        snapshot_with_categories(
            processes
                .into_iter()
                .map(|(pid, name)| (pid, name, ProcessCategory::Other))
                .collect(),
        )
    }

    fn snapshot_with_categories(processes: Vec<(u32, &str, ProcessCategory)>) -> ProcessSnapshot {
        ProcessSnapshot {
            at: t("2026-03-06T12:00:00Z"),
            processes: processes
                .into_iter()
                .map(|(pid, name, category)| ProcessInfo {
                    pid,
                    name: name.into(),
                    category,
                })
                .collect(),
            browsers: vec![],
            summary: CategorySummary::default(),
        }
    }

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn blocked_pattern_is_case_insensitive_substring() {
        let child = ChildConfig {
            blocked_processes: vec!["minecraft".into()],
            ..Default::default()
        };
        let snapshot = snapshot(vec![(42, "Minecraft.exe"), (7, "notepad.exe")]);
        let (intents, detections) =
            evaluate_snapshot(&agent(), &snapshot, &child, None, t("2026-03-06T12:00:00Z"), &settings());

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].0, "Minecraft.exe");
        let block = intents
            .iter()
            .find(|i| matches!(i, EnforcementIntent::BlockProcess { .. }))
            .unwrap();
        match block {
            EnforcementIntent::BlockProcess { pid, reason, .. } => {
                assert_eq!(*pid, 42);
                assert!(reason.contains("minecraft"));
            }
            _ => unreachable!(),
        }
        assert_eq!(intents.len(), 1);
    }

    #[test]
    fn first_pattern_wins() {
        let child = ChildConfig {
            blocked_processes: vec!["mine".into(), "minecraft".into()],
            ..Default::default()
        };
        let snapshot = snapshot(vec![(42, "Minecraft.exe")]);
        let (_, detections) =
            evaluate_snapshot(&agent(), &snapshot, &child, None, t("2026-03-06T12:00:00Z"), &settings());
        assert_eq!(detections[0].1, "mine");
    }

    #[test]
    fn schedule_blocks_only_inside_window_and_unallowed_category() {
        let child = ChildConfig {
            schedules: vec![DaySchedule {
                name: "homework".into(),
                days: [DayOfWeek::Fri].into_iter().collect(),
                start: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                allowed_categories: [ProcessCategory::Education].into_iter().collect(),
                blocked_patterns: vec!["steam".into()],
            }],
            ..Default::default()
        };

        // 2026-03-06 is a Friday. 17:00 is inside the window.
        let inside = t("2026-03-06T17:00:00Z");
        let outside = t("2026-03-06T19:00:00Z");

        let snap = snapshot_with_categories(vec![
            (1, "steam.exe", ProcessCategory::Games),
            (2, "steam-tutor", ProcessCategory::Education),
        ]);

        let (intents, _) = evaluate_snapshot(&agent(), &snap, &child, None, inside, &settings());
        let blocked: Vec<_> = intents
            .iter()
            .filter_map(|i| match i {
                EnforcementIntent::BlockProcess { pid, .. } => Some(*pid),
                _ => None,
            })
            .collect();
        // The education-category match is allowed; the game is not.
        assert_eq!(blocked, vec![1]);

        let (intents, _) = evaluate_snapshot(&agent(), &snap, &child, None, outside, &settings());
        assert!(intents.is_empty());
    }

    #[test]
    fn focus_profile_widens_blocklist() {
        let child = ChildConfig::default();
        let profile = FocusProfile {
            hide_icon_patterns: vec![],
            blocked_categories: [ProcessCategory::Games].into_iter().collect(),
            blocked_apps: vec!["discord".into()],
        };
        let snap = snapshot_with_categories(vec![
            (1, "Discord.exe", ProcessCategory::Other),
            (2, "solitaire", ProcessCategory::Games),
            (3, "code.exe", ProcessCategory::Productivity),
        ]);

        let (intents, _) = evaluate_snapshot(
            &agent(),
            &snap,
            &child,
            Some(&profile),
            t("2026-03-06T12:00:00Z"),
            &settings(),
        );
        let blocked: Vec<_> = intents
            .iter()
            .filter_map(|i| match i {
                EnforcementIntent::BlockProcess { pid, .. } => Some(*pid),
                _ => None,
            })
            .collect();
        assert_eq!(blocked, vec![1, 2]);

        // Without focus, nothing is blocked.
        let (intents, _) =
            evaluate_snapshot(&agent(), &snap, &child, None, t("2026-03-06T12:00:00Z"), &settings());
        assert!(intents.is_empty());
    }

    fn bedtime_child() -> ChildConfig {
        ChildConfig {
            bedtime: BedtimeRule {
                enabled: true,
                time: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
                days: [DayOfWeek::Fri].into_iter().collect(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn bedtime_warning_ladder_fires_each_threshold_once() {
        let child = bedtime_child();
        let mut ladder = BedtimeLadder::default();
        let settings = settings();

        // 20:45 Friday: the 15-minute warning.
        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-06T20:45:00Z"), &settings);
        assert_eq!(intents.len(), 1);
        match &intents[0] {
            EnforcementIntent::Warning {
                subject,
                minutes_remaining,
                urgency,
                ..
            } => {
                assert_eq!(*subject, WarningSubject::Bedtime);
                assert_eq!(*minutes_remaining, 15);
                assert_eq!(*urgency, Urgency::Normal);
            }
            other => panic!("unexpected {other:?}"),
        }

        // 30 seconds later: already fired, nothing new.
        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-06T20:45:30Z"), &settings);
        assert!(intents.is_empty());

        // 20:55: the 5-minute warning is critical.
        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-06T20:55:00Z"), &settings);
        assert_eq!(intents.len(), 1);
        assert!(matches!(
            intents[0],
            EnforcementIntent::Warning {
                urgency: Urgency::Critical,
                minutes_remaining: 5,
                ..
            }
        ));

        // 20:59: the 1-minute warning.
        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-06T20:59:00Z"), &settings);
        assert_eq!(intents.len(), 1);
        assert!(matches!(
            intents[0],
            EnforcementIntent::Warning {
                minutes_remaining: 1,
                ..
            }
        ));

        // 21:00: logout with the configured grace.
        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-06T21:00:00Z"), &settings);
        assert_eq!(intents.len(), 1);
        assert!(matches!(
            intents[0],
            EnforcementIntent::Logout {
                grace_secs: 60,
                ..
            }
        ));
    }

    #[test]
    fn bedtime_ignores_other_days_and_disabled() {
        let mut child = bedtime_child();
        let mut ladder = BedtimeLadder::default();
        let settings = settings();

        // 2026-03-05 is a Thursday.
        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-05T21:30:00Z"), &settings);
        assert!(intents.is_empty());

        child.bedtime.enabled = false;
        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-06T21:30:00Z"), &settings);
        assert!(intents.is_empty());
    }

    #[test]
    fn bedtime_ladder_resets_next_week() {
        let child = bedtime_child();
        let mut ladder = BedtimeLadder::default();
        let settings = settings();

        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-06T20:45:00Z"), &settings);
        assert_eq!(intents.len(), 1);

        // Next Friday: ladder fires again.
        let intents = evaluate_bedtime(&agent(), &child, &mut ladder, t("2026-03-13T20:45:00Z"), &settings);
        assert_eq!(intents.len(), 1);
    }
}
