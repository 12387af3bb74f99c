//! Outbound events streamed to UI subscribers.

use serde::{Deserialize, Serialize};

use warden_types::{Activity, AgentId, Session, Urgency, Violation};

/// One event on a named UI channel. The serde tag is the channel name the
/// UI subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "camelCase")]
pub enum UiEvent {
    OsViolation {
        violation: Violation,
    },
    OsSessionUpdate {
        agent: AgentId,
        #[serde(default)]
        session: Option<Session>,
    },
    OsQuotaWarning {
        agent: AgentId,
        activity: Activity,
        minutes_remaining: u32,
        urgency: Urgency,
    },
    OsQuotaExhausted {
        agent: AgentId,
        activity: Activity,
    },
    OsBedtimeWarning {
        agent: AgentId,
        minutes_remaining: u32,
        urgency: Urgency,
    },
    OsBlockedProcessDetected {
        agent: AgentId,
        process_name: String,
        pattern: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_match_contract() {
        let event = UiEvent::OsQuotaExhausted {
            agent: AgentId::new("a1"),
            activity: Activity::Computer,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "osQuotaExhausted");

        let event = UiEvent::OsBlockedProcessDetected {
            agent: AgentId::new("a1"),
            process_name: "Minecraft.exe".into(),
            pattern: "minecraft".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["channel"], "osBlockedProcessDetected");
    }
}
