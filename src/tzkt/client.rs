//! REST client for the TzKT indexer.
//!
//! Houses `TzktClient`, the typed upstream error, and the fetch path that
//! turns per-level delegation batches into pipeline messages.

use crate::runtime::config::TzktConfig;
use crate::runtime::telemetry::Telemetry;
use crate::tzkt::retry::{retry_with_delay, RetryPolicy};
use crate::tzkt::DelegationFetcher;
use crate::types::{FetchedDelegation, PipelineMessage};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fixed delay between fetch attempts.
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum TzktError {
    /// Upstream answered with a non-success status.
    Status { code: u16 },
    /// The surrounding cancellation token fired mid-request.
    Cancelled,
}

impl std::fmt::Display for TzktError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TzktError::Status { code } => write!(f, "non-success status code: {code}"),
            TzktError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for TzktError {}

/// HTTP + websocket client to a TzKT instance.
///
/// The REST side retries transient failures internally; subscription
/// failures are terminal and surface to the caller (see
/// [`crate::tzkt::subscription`]).
#[derive(Debug, Clone)]
pub struct TzktClient {
    base_url: Arc<String>,
    ws_url: Arc<String>,
    http: reqwest::Client,
    retry_attempts: usize,
    telemetry: Arc<Telemetry>,
}

impl TzktClient {
    pub fn new(cfg: &TzktConfig, telemetry: Arc<Telemetry>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("failed to build TzKT HTTP client")?;

        Ok(Self {
            base_url: Arc::new(cfg.url.trim_end_matches('/').to_owned()),
            ws_url: Arc::new(cfg.ws_url()),
            http,
            retry_attempts: cfg.retry_attempts,
            telemetry,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn ws_endpoint(&self) -> &str {
        &self.ws_url
    }

    pub(crate) fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    fn delegations_url(&self, level: u64) -> String {
        format!("{}/v1/operations/delegations?level={level}", self.base_url)
    }

    /// Fetches the delegation batch at `level` and, when non-empty, emits one
    /// pipeline message. An empty response is a success that emits nothing.
    pub async fn delegations_at_level(
        &self,
        level: u64,
        out: &mpsc::Sender<PipelineMessage>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let url = self.delegations_url(level);
        let response = self
            .execute_request(&url, shutdown)
            .await
            .context("executing request failed")?;

        let delegations: Vec<FetchedDelegation> = response
            .json()
            .await
            .context("decoding response failed")?;

        self.telemetry.record_fetched_level();

        if delegations.is_empty() {
            return Ok(());
        }

        tracing::trace!(level, count = delegations.len(), "sending delegations to pipeline");
        out.send(PipelineMessage::delegations(level, delegations))
            .await
            .map_err(|_| anyhow!("pipeline channel closed"))?;

        Ok(())
    }

    /// Issues the GET with the configured retry budget (zero retries without
    /// bound). Any transport error or non-success status is retried;
    /// cancellation aborts immediately.
    async fn execute_request(
        &self,
        url: &str,
        shutdown: &CancellationToken,
    ) -> Result<reqwest::Response> {
        tracing::trace!(url, "executing HTTP request");
        retry_with_delay(
            RetryPolicy::new(RETRY_DELAY, self.retry_attempts, shutdown),
            |_| async move {
                let response = tokio::select! {
                    _ = shutdown.cancelled() => return Err(TzktError::Cancelled.into()),
                    result = self.http.get(url).send() => {
                        result.context("HTTP request failed")?
                    }
                };

                let status = response.status();
                if !status.is_success() {
                    return Err(TzktError::Status {
                        code: status.as_u16(),
                    }
                    .into());
                }

                Ok(response)
            },
            |attempt, err| {
                tracing::warn!(attempt, error = %err, "fetch attempt failed; retrying");
            },
        )
        .await
    }
}

#[async_trait]
impl DelegationFetcher for TzktClient {
    async fn fetch_delegations_at_level(
        &self,
        level: u64,
        out: &mpsc::Sender<PipelineMessage>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        self.delegations_at_level(level, out, shutdown).await
    }
}
