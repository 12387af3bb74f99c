//! Control-plane IPC: the imperative surface the parent UI talks to.
//!
//! Commands and responses travel as NDJSON over a Unix domain socket. Every
//! command gets exactly one response; the `watch` command instead switches
//! the connection into a one-way stream of [`UiEvent`]s.

pub mod command;
pub mod event;
pub mod server;

pub use command::{
    AgentSummary, ControlCommand, ControlResponse, StatusSummary,
};
pub use event::UiEvent;
pub use server::{
    spawn_control_server, ControlCmdRx, ControlCmdTx, ControlServerHandle, SubscriberRx,
    SubscriberTx,
};
