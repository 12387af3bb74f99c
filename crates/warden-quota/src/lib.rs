//! Client for the external quota/permission service.
//!
//! The service is authoritative for whether an activity is allowed and how
//! much time remains today. This crate provides the [`QuotaClient`] trait,
//! the HTTP implementation, a TTL'd [`VerdictCache`] implementing the
//! stale-read rules, and the change poller that surfaces service-side state
//! changes (a parent buying more time, a ban) as [`QuotaEvent`]s.

pub mod cache;
pub mod http;

use async_trait::async_trait;

use warden_types::{Activity, ChildId, QuotaVerdict};

pub use cache::{CachedVerdict, VerdictCache};
pub use http::{ChangePoller, HttpQuotaClient, QuotaEndpoint};

/// Errors from quota-service operations.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Transport failure: the service could not be reached or timed out.
    /// Callers fall back to the cached verdict within TTL.
    #[error("quota service unavailable: {0}")]
    Unavailable(String),

    /// The service answered but the body was not a verdict.
    #[error("quota service protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for QuotaError {
    fn from(e: reqwest::Error) -> Self {
        QuotaError::Unavailable(e.to_string())
    }
}

/// Push notification from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaEvent {
    /// Something about this child changed service-side (time purchased,
    /// ban toggled, cap edited). Cached verdicts for the child are invalid
    /// and every bound agent must be re-evaluated.
    StateChanged { child: ChildId },
}

/// The quota/permission service, as the control plane sees it.
///
/// `check` never mutates service-side accounting; usage decrement is the
/// service's own concern.
#[async_trait]
pub trait QuotaClient: Send + Sync {
    async fn check(&self, child: &ChildId, activity: Activity) -> Result<QuotaVerdict, QuotaError>;
}
