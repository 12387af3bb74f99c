//! Warden: central control plane for a parental-controls fleet.
//!
//! This facade crate re-exports the workspace components; the end-to-end
//! scenario tests in `tests/` drive the supervisor through it.

pub use warden_control as control;
pub use warden_core as core;
pub use warden_daemon as daemon;
pub use warden_gateway as gateway;
pub use warden_quota as quota;
pub use warden_types as types;
