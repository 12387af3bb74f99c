//! Bounded in-memory journal of violations and activity events.
//!
//! Two rings, append-at-head, evict-at-tail. Subscribers receive every new
//! entry as it is appended; a subscriber that stops draining is pruned
//! rather than blocking the writer.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use warden_types::{ActivityEvent, Violation};

/// Maximum retained violations.
pub const VIOLATION_CAP: usize = 200;

/// Maximum retained activity events.
pub const ACTIVITY_CAP: usize = 500;

/// Per-subscriber buffer before pruning.
const SUBSCRIBER_BUFFER: usize = 256;

/// One journal entry, as delivered to subscribers.
#[derive(Debug, Clone)]
pub enum JournalEntry {
    Violation(Violation),
    Activity(ActivityEvent),
}

/// The violation and activity rings.
#[derive(Default)]
pub struct Journal {
    violations: VecDeque<Violation>,
    activity: VecDeque<ActivityEvent>,
    subscribers: Vec<mpsc::Sender<JournalEntry>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the rings from persisted contents (newest first).
    pub fn restore(violations: Vec<Violation>, activity: Vec<ActivityEvent>) -> Self {
        Self {
            violations: violations.into_iter().take(VIOLATION_CAP).collect(),
            activity: activity.into_iter().take(ACTIVITY_CAP).collect(),
            subscribers: Vec::new(),
        }
    }

    /// Append a violation at the head, evicting at the tail past the cap.
    pub fn record_violation(&mut self, violation: Violation) {
        self.notify(JournalEntry::Violation(violation.clone()));
        self.violations.push_front(violation);
        self.violations.truncate(VIOLATION_CAP);
    }

    /// Append an activity event.
    pub fn record_activity(&mut self, event: ActivityEvent) {
        self.notify(JournalEntry::Activity(event.clone()));
        self.activity.push_front(event);
        self.activity.truncate(ACTIVITY_CAP);
    }

    /// Newest-first violations, at most `limit`.
    pub fn violations(&self, limit: Option<usize>) -> Vec<Violation> {
        let limit = limit.unwrap_or(self.violations.len());
        self.violations.iter().take(limit).cloned().collect()
    }

    /// Newest-first activity events, at most `limit`.
    pub fn activity(&self, limit: Option<usize>) -> Vec<ActivityEvent> {
        let limit = limit.unwrap_or(self.activity.len());
        self.activity.iter().take(limit).cloned().collect()
    }

    pub fn clear_violations(&mut self) {
        self.violations.clear();
    }

    /// Register a subscriber that receives every future entry.
    pub fn subscribe(&mut self) -> mpsc::Receiver<JournalEntry> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, entry: JournalEntry) {
        // try_send, never wait: a closed subscriber is pruned; a full one
        // misses this entry and keeps its slot.
        self.subscribers
            .retain(|tx| tx.try_send(entry.clone()).is_ok() || !tx.is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_types::{ActivityKind, AgentId, ViolationKind};

    fn violation(n: usize) -> Violation {
        Violation {
            kind: ViolationKind::BlockedProcess,
            agent: AgentId::new("a1"),
            hostname: "den-pc".into(),
            process_name: Some(format!("proc-{n}")),
            reason: "test".into(),
            at: Utc::now(),
        }
    }

    fn activity(n: usize) -> ActivityEvent {
        ActivityEvent {
            kind: ActivityKind::WarningSent,
            agent: AgentId::new("a1"),
            child: None,
            detail: format!("event-{n}"),
            at: Utc::now(),
        }
    }

    #[test]
    fn newest_first_with_limit() {
        let mut journal = Journal::new();
        for n in 0..5 {
            journal.record_violation(violation(n));
        }
        let recent = journal.violations(Some(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].process_name.as_deref(), Some("proc-4"));
        assert_eq!(recent[1].process_name.as_deref(), Some("proc-3"));
    }

    #[test]
    fn violation_ring_evicts_past_cap() {
        let mut journal = Journal::new();
        for n in 0..(VIOLATION_CAP + 10) {
            journal.record_violation(violation(n));
        }
        let all = journal.violations(None);
        assert_eq!(all.len(), VIOLATION_CAP);
        // Newest entry kept, oldest evicted.
        assert_eq!(
            all[0].process_name.as_deref(),
            Some(format!("proc-{}", VIOLATION_CAP + 9).as_str())
        );
        assert!(all.iter().all(|v| v.process_name.as_deref() != Some("proc-0")));
    }

    #[test]
    fn activity_ring_evicts_past_cap() {
        let mut journal = Journal::new();
        for n in 0..(ACTIVITY_CAP + 3) {
            journal.record_activity(activity(n));
        }
        assert_eq!(journal.activity(None).len(), ACTIVITY_CAP);
    }

    #[tokio::test]
    async fn subscriber_receives_new_entries() {
        let mut journal = Journal::new();
        let mut rx = journal.subscribe();
        journal.record_violation(violation(1));

        match rx.recv().await.unwrap() {
            JournalEntry::Violation(v) => {
                assert_eq!(v.process_name.as_deref(), Some("proc-1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned() {
        let mut journal = Journal::new();
        let rx = journal.subscribe();
        drop(rx);
        journal.record_violation(violation(1));
        journal.record_violation(violation(2));
        assert!(journal.subscribers.is_empty());
    }

    #[test]
    fn clear_violations_leaves_activity() {
        let mut journal = Journal::new();
        journal.record_violation(violation(1));
        journal.record_activity(activity(1));
        journal.clear_violations();
        assert!(journal.violations(None).is_empty());
        assert_eq!(journal.activity(None).len(), 1);
    }

    #[test]
    fn restore_truncates_to_caps() {
        let violations: Vec<_> = (0..(VIOLATION_CAP + 5)).map(violation).collect();
        let journal = Journal::restore(violations, vec![]);
        assert_eq!(journal.violations(None).len(), VIOLATION_CAP);
    }
}
