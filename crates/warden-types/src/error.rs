//! Error types shared across all Warden crates.

use crate::ids::AgentId;

/// Errors that can occur across the Warden control plane.
///
/// Each variant corresponds to a failure mode with defined handling: agent
/// transport failures are journaled and retried on the natural telemetry
/// cadence, quota-service outages fall back to cached verdicts within TTL,
/// and configuration errors reject the command without touching state.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// The agent gateway service itself is absent. Fatal at startup: the
    /// control plane refuses to enter the monitoring state.
    #[error("agent gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The gateway rejected or timed out an agent operation.
    #[error("agent {0} unavailable: {1}")]
    AgentUnavailable(AgentId, String),

    /// The quota service could not be reached.
    #[error("quota service unavailable: {0}")]
    QuotaUnavailable(String),

    /// An agent action was refused on the host (missing privileges,
    /// unsupported platform).
    #[error("agent {agent} denied action {action}: {detail}")]
    PermissionDenied {
        agent: AgentId,
        action: String,
        detail: String,
    },

    /// A command carried an invalid or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Telemetry arrived for an agent with no bound child.
    #[error("agent {0} has no child binding")]
    MissingBinding(AgentId),
}
