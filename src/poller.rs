//! Ingestion lifecycle owner.
//!
//! One connect cycle starts the head subscription, waits for the initial head
//! level, and reconciles the persisted tip with the chain tip by backfilling
//! every missing level in ascending order. The subscription holds streamed
//! fetches until reconciliation is acknowledged, so pipeline messages stay in
//! level order within a cycle.

use crate::runtime::config::PollerConfig;
use crate::runtime::supervisor::FatalErrorSender;
use crate::store::Store;
use crate::tzkt::{DelegationFetcher, HeadInit, HeadSubscriber};
use crate::types::PipelineMessage;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Fixed delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

enum CycleControl {
    Continue,
    Abort,
}

pub struct Poller<T, S> {
    tzkt: Arc<T>,
    store: Arc<S>,
    pipeline: mpsc::Sender<PipelineMessage>,
    cfg: PollerConfig,
    fatal: FatalErrorSender,
}

impl<T, S> Poller<T, S>
where
    T: DelegationFetcher + HeadSubscriber + 'static,
    S: Store,
{
    pub fn new(
        tzkt: Arc<T>,
        store: Arc<S>,
        pipeline: mpsc::Sender<PipelineMessage>,
        cfg: PollerConfig,
        fatal: FatalErrorSender,
    ) -> Self {
        Self {
            tzkt,
            store,
            pipeline,
            cfg,
            fatal,
        }
    }

    /// Runs connect cycles until cancellation, retrying lost subscriptions up
    /// to the configured budget with a fixed delay. Exceeding the budget
    /// publishes one fatal error and terminates the poller.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut attempt = 0;

        loop {
            match self.connect(&shutdown).await {
                Ok(()) => {
                    tracing::debug!("stopping reconnection attempts");
                    return;
                }
                Err(err) => {
                    if shutdown.is_cancelled() {
                        return;
                    }

                    if attempt < self.cfg.retry_attempts {
                        attempt += 1;
                        tracing::error!(
                            attempt,
                            error = %err,
                            delay = ?RECONNECT_DELAY,
                            "subscription lost; retrying"
                        );
                        tokio::select! {
                            _ = sleep(RECONNECT_DELAY) => {}
                            _ = shutdown.cancelled() => return,
                        }
                    } else {
                        self.fatal
                            .report(anyhow!("maximum reconnection attempts reached: {err:#}"))
                            .await;
                        return;
                    }
                }
            }
        }
    }

    /// One connect cycle: subscription up, head reconciliation, then waiting
    /// on subscription errors or cancellation. The subscription task and its
    /// channels are released on every exit path.
    async fn connect(&self, shutdown: &CancellationToken) -> Result<()> {
        let (head_tx, mut head_rx) = mpsc::channel::<HeadInit>(1);
        let (err_tx, mut err_rx) = mpsc::channel::<anyhow::Error>(1);

        let cycle = shutdown.child_token();
        let subscription = tokio::spawn({
            let tzkt = self.tzkt.clone();
            let pipeline = self.pipeline.clone();
            let cycle = cycle.clone();
            async move { tzkt.subscribe_to_head(pipeline, head_tx, err_tx, cycle).await }
        });

        let result = loop {
            tokio::select! {
                Some(err) = err_rx.recv() => break Err(err),
                Some(init) = head_rx.recv() => {
                    match self.reconcile(init.level(), shutdown).await {
                        CycleControl::Continue => init.acknowledge(),
                        // Dropping the announcement also releases the stream;
                        // the cycle token is about to be cancelled anyway.
                        CycleControl::Abort => break Ok(()),
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("poller shutdown initiated, stopping operations");
                    break Ok(());
                }
            }
        };

        cycle.cancel();
        if let Err(err) = subscription.await {
            tracing::warn!(error = %err, "subscription task panicked");
        }

        result
    }

    /// Compares the persisted tip against the initial head and backfills the
    /// gap. Store failures abort the cycle after reporting: a degraded store
    /// is not a subscription problem, so reconnecting cannot help.
    async fn reconcile(&self, head_level: u64, shutdown: &CancellationToken) -> CycleControl {
        let db_level = match self.store.current_level().await {
            Ok(level) => level,
            Err(err) => {
                self.fatal
                    .report(anyhow!("Error getting current database level: {err:#}"))
                    .await;
                return CycleControl::Abort;
            }
        };

        tracing::debug!(db_level, "database level retrieved");
        tracing::info!(head_level, "received chain current head level");

        let start_level = (db_level + 1).max(self.cfg.start_level);
        if head_level > db_level {
            tracing::debug!(start_level, head_level, "fetching past delegations");
            if let Err(err) = self.backfill(start_level, head_level, shutdown).await {
                self.fatal
                    .report(anyhow!("Error fetching past delegations: {err:#}"))
                    .await;
                return CycleControl::Continue;
            }
            tracing::info!(
                start_level,
                head_level,
                "past delegations fetched and processed"
            );
        }

        CycleControl::Continue
    }

    /// Fetches `[start, end]` strictly in ascending order, one level at a
    /// time, aborting at the first failure.
    async fn backfill(&self, start: u64, end: u64, shutdown: &CancellationToken) -> Result<()> {
        for level in start..=end {
            tracing::debug!(level, "fetching delegations for level");
            self.tzkt
                .fetch_delegations_at_level(level, &self.pipeline, shutdown)
                .await
                .with_context(|| format!("Error fetching delegations for level {level}"))?;
        }
        Ok(())
    }
}
