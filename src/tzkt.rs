//! TzKT upstream plumbing: REST client, head subscription, event wire types,
//! and retry policy.

pub mod client;
pub mod events;
pub mod retry;
pub mod subscription;

use crate::types::PipelineMessage;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub use client::{TzktClient, TzktError};
pub use events::{EventMessage, Head, MESSAGE_QUEUE_CAPACITY};

/// Announcement of the initial head level observed by a fresh subscription.
///
/// The subscription holds back streamed fetches until the receiver calls
/// [`HeadInit::acknowledge`] (or drops the announcement), so backfill
/// messages always precede streamed ones on the pipeline.
#[derive(Debug)]
pub struct HeadInit {
    level: u64,
    ack: oneshot::Sender<()>,
}

impl HeadInit {
    pub fn new(level: u64) -> (Self, oneshot::Receiver<()>) {
        let (ack, ack_rx) = oneshot::channel();
        (Self { level, ack }, ack_rx)
    }

    pub fn level(&self) -> u64 {
        self.level
    }

    /// Releases the stream.
    pub fn acknowledge(self) {
        let _ = self.ack.send(());
    }
}

/// Fetches the delegation batch for a single level and, when non-empty,
/// forwards it to the pipeline.
#[async_trait]
pub trait DelegationFetcher: Send + Sync {
    async fn fetch_delegations_at_level(
        &self,
        level: u64,
        out: &mpsc::Sender<PipelineMessage>,
        shutdown: &CancellationToken,
    ) -> Result<()>;
}

/// Runs a head subscription until the token is cancelled or the subscription
/// terminates.
///
/// The initial head level is emitted once on `head_init`; delegation batches
/// and reorg markers flow to `out`; connect, subscribe, and decode failures
/// are reported on `errs` and end the call.
#[async_trait]
pub trait HeadSubscriber: Send + Sync {
    async fn subscribe_to_head(
        &self,
        out: mpsc::Sender<PipelineMessage>,
        head_init: mpsc::Sender<HeadInit>,
        errs: mpsc::Sender<anyhow::Error>,
        shutdown: CancellationToken,
    );
}
