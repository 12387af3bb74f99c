//! Warden daemon: the long-running control-plane process.
//!
//! Wires the supervisor core to its transports: the agent-hub socket, the
//! quota service, and the control API socket. State persists as a single
//! blob written after state-affecting commands and on a periodic autosave.
//!
//! - [`config`]: `warden.toml` loading with documented defaults
//! - [`persistence`]: atomic state blob storage and the PID file
//! - [`runtime`]: the `select!` event loop and telemetry coalescing

pub mod config;
pub mod persistence;
pub mod runtime;

pub use config::{warden_dir, DaemonConfig};
pub use persistence::{read_pid, StateStore};
pub use runtime::run;
