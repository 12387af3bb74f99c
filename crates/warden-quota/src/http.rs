//! HTTP implementation of the quota client and the change poller.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use warden_types::{Activity, ChildId, QuotaVerdict};

use crate::{QuotaClient, QuotaError, QuotaEvent};

/// Per-request deadline for verdict checks.
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-poll hold time requested from the changes endpoint.
const POLL_HOLD_SECS: u64 = 25;

/// Delay before reconnecting after a poll failure.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Where the quota service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaEndpoint {
    /// Base URL, e.g. `https://family.example.net/api`.
    pub base_url: String,
    /// Bearer token, if the deployment requires one.
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Serialize)]
struct CheckRequest<'a> {
    child_id: &'a ChildId,
    activity: Activity,
    /// Always true: the control plane never decrements service-side
    /// accounting.
    check_only: bool,
}

#[derive(Deserialize)]
struct CheckResponse {
    allowed: bool,
    #[serde(default)]
    banned: bool,
    remaining_secs: i64,
    as_of: chrono::DateTime<chrono::Utc>,
}

/// `QuotaClient` over HTTP.
pub struct HttpQuotaClient {
    client: reqwest::Client,
    endpoint: QuotaEndpoint,
}

impl HttpQuotaClient {
    pub fn new(endpoint: QuotaEndpoint) -> Result<Self, QuotaError> {
        let client = reqwest::Client::builder()
            .timeout(CHECK_TIMEOUT)
            .build()
            .map_err(|e| QuotaError::Unavailable(format!("http client init: {e}")))?;
        Ok(Self { client, endpoint })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.endpoint.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl QuotaClient for HttpQuotaClient {
    async fn check(&self, child: &ChildId, activity: Activity) -> Result<QuotaVerdict, QuotaError> {
        let request = self.authorize(self.client.post(self.url("check"))).json(&CheckRequest {
            child_id: child,
            activity,
            check_only: true,
        });

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(QuotaError::Protocol(format!(
                "check returned {}",
                response.status()
            )));
        }

        let body: CheckResponse = response
            .json()
            .await
            .map_err(|e| QuotaError::Protocol(format!("check body: {e}")))?;

        debug!(
            child = %child,
            %activity,
            allowed = body.allowed,
            remaining = body.remaining_secs,
            "quota verdict"
        );

        Ok(QuotaVerdict {
            allowed: body.allowed,
            banned: body.banned,
            remaining_secs: body.remaining_secs,
            as_of: body.as_of,
        })
    }
}

#[derive(Deserialize)]
struct ChangesResponse {
    #[serde(default)]
    changed: Vec<ChildId>,
    #[serde(default)]
    cursor: Option<String>,
}

/// Long-polls the service's `changes` endpoint and forwards state changes.
///
/// Runs until the event receiver is dropped. Poll failures back off and
/// retry; the supervisor keeps enforcing from cached verdicts in the
/// meantime (subject to the TTL rules).
pub struct ChangePoller {
    client: reqwest::Client,
    endpoint: QuotaEndpoint,
}

impl ChangePoller {
    pub fn new(endpoint: QuotaEndpoint) -> Result<Self, QuotaError> {
        // No overall timeout here: the request is expected to hang for the
        // long-poll hold. Connect failures still surface promptly.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(POLL_HOLD_SECS + 10))
            .build()
            .map_err(|e| QuotaError::Unavailable(format!("http client init: {e}")))?;
        Ok(Self { client, endpoint })
    }

    /// Run the poll loop, sending events until `events` closes.
    pub async fn run(self, events: mpsc::Sender<QuotaEvent>) {
        info!(base_url = %self.endpoint.base_url, "quota change poller started");
        let mut cursor: Option<String> = None;

        loop {
            if events.is_closed() {
                break;
            }

            let url = format!(
                "{}/changes?hold={}",
                self.endpoint.base_url.trim_end_matches('/'),
                POLL_HOLD_SECS
            );
            let mut request = self.client.get(&url);
            if let Some(token) = &self.endpoint.auth_token {
                request = request.bearer_auth(token);
            }
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }

            let response = match request.send().await {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    warn!(status = %r.status(), "quota changes poll rejected");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
                Err(e) => {
                    debug!(error = %e, "quota changes poll failed, retrying");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let body: ChangesResponse = match response.json().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "quota changes body unparseable");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            cursor = body.cursor;
            for child in body.changed {
                if events
                    .send(QuotaEvent::StateChanged { child })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}
