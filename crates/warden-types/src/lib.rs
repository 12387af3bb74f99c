//! Shared data model for the Warden control plane.
//!
//! Every type that crosses a crate boundary lives here: agent and child
//! records, session and process telemetry shapes, usage accounting cells,
//! quota verdicts, enforcement intents, journal entries, runtime settings,
//! and the persisted state blob. All of it is serde-serializable; the wire
//! formats (gateway frames, control protocol, persisted state) are built
//! from these types directly.

pub mod agent;
pub mod child;
pub mod error;
pub mod ids;
pub mod intent;
pub mod journal;
pub mod persist;
pub mod process;
pub mod settings;
pub mod verdict;

pub use agent::{Agent, DeployedScript, Platform, ScriptKind, Session, SessionPayload};
pub use child::{BedtimeRule, ChildConfig, ChildConfigPatch, DayOfWeek, DaySchedule, FocusProfile};
pub use error::WardenError;
pub use ids::{AgentId, ChildId};
pub use intent::{EnforcementIntent, Urgency, WarningSubject};
pub use journal::{ActivityEvent, ActivityKind, Violation, ViolationKind};
pub use persist::PersistedState;
pub use process::{
    BrowserInfo, CategorySummary, ProcessCategory, ProcessInfo, ProcessPayload, ProcessSnapshot,
};
pub use settings::{Settings, SettingsPatch};
pub use verdict::{Activity, QuotaVerdict};
