//! Pipeline consumer: applies delegation batches and reorg rollbacks to the
//! store, in arrival order.

use crate::runtime::supervisor::FatalErrorSender;
use crate::runtime::telemetry::Telemetry;
use crate::store::Store;
use crate::types::PipelineMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Drains the pipeline channel until cancellation.
///
/// Store failures are not retried here: the pipeline cannot make progress
/// blind, so they are reported as fatal and the supervisor tears the process
/// down.
pub struct Processor<S> {
    store: Arc<S>,
    fatal: FatalErrorSender,
    telemetry: Arc<Telemetry>,
}

impl<S: Store> Processor<S> {
    pub fn new(store: Arc<S>, fatal: FatalErrorSender, telemetry: Arc<Telemetry>) -> Self {
        Self {
            store,
            fatal,
            telemetry,
        }
    }

    pub async fn run(
        &self,
        mut pipeline: mpsc::Receiver<PipelineMessage>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("starting processor");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("processor stopping due to cancellation");
                    return;
                }
                msg = pipeline.recv() => match msg {
                    None => {
                        tracing::debug!("pipeline channel closed; processor stopping");
                        return;
                    }
                    Some(msg) => self.apply(msg).await,
                },
            }
        }
    }

    async fn apply(&self, msg: PipelineMessage) {
        if msg.reorg {
            tracing::debug!(level = msg.level, "processing reorg rollback");
            if let Err(err) = self.store.delete_from_level(msg.level).await {
                self.fatal
                    .report(err.context("failed to delete delegations"))
                    .await;
            }
            return;
        }

        if msg.data.is_empty() {
            tracing::debug!(level = msg.level, "no delegations to process");
            return;
        }

        tracing::info!(level = msg.level, count = msg.data.len(), "saving delegations");
        match self.store.save_delegations(&msg.data).await {
            Ok(()) => self.telemetry.record_saved_batch(),
            Err(err) => {
                self.fatal
                    .report(err.context("failed to save delegations"))
                    .await;
            }
        }
    }
}
