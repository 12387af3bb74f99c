//! Supervisor core for the Warden parental-controls control plane.
//!
//! The crate is organized around one stateful coordinator and its pure
//! parts:
//!
//! - [`registry`]: agent records, child bindings, session transitions
//! - [`usage`]: idle-aware, event-driven time accounting
//! - [`rules`]: blocklist, schedule, and bedtime evaluation
//! - [`planner`]: quota evaluation and the per-agent enforcement state machine
//! - [`dispatch`]: intent-to-action translation with suppression windows
//! - [`timers`]: the per-agent deadline table (at most one logout each)
//! - [`journal`]: bounded violation/activity rings with subscriber fan-out
//! - [`supervisor`]: the event-driven coordinator tying it all together
//!
//! Everything below the supervisor is synchronous and deterministic;
//! suspension points exist only where the supervisor talks to the gateway
//! or the quota service.

pub mod dispatch;
pub mod journal;
pub mod localtime;
pub mod planner;
pub mod registry;
pub mod rules;
pub mod supervisor;
pub mod timers;
pub mod usage;

pub use dispatch::Dispatcher;
pub use journal::{Journal, JournalEntry};
pub use planner::{EnforceState, Planner};
pub use registry::AgentRegistry;
pub use supervisor::Supervisor;
pub use timers::TimerTable;
pub use usage::UsageAccountant;
