use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use delegation_watcher::{
    fatal_channel, Outcome, Poller, PollerConfig, Processor, Telemetry, TzktClient, TzktConfig,
};
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::memory_store::MemoryStore;

static TRACING: Lazy<()> = Lazy::new(|| delegation_watcher::init_tracing("info"));

pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Capacity matching the production pipeline channel.
const PIPELINE_CAPACITY: usize = 100;

/// A fully wired ingestion stack (client, poller, processor, supervisor)
/// pointed at a mock upstream and an in-memory store.
pub struct RunningWatcher {
    pub shutdown: CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub supervisor: JoinHandle<Outcome>,
    poller: JoinHandle<()>,
    processor: JoinHandle<()>,
}

pub fn start_watcher(
    base_url: &str,
    store: Arc<MemoryStore>,
    poller_cfg: PollerConfig,
) -> RunningWatcher {
    init_tracing();

    let telemetry = Arc::new(Telemetry::default());
    let tzkt_cfg = TzktConfig {
        url: base_url.to_owned(),
        timeout: Duration::from_secs(2),
        retry_attempts: 2,
    };
    let tzkt = Arc::new(TzktClient::new(&tzkt_cfg, telemetry.clone()).expect("client must build"));

    let shutdown = CancellationToken::new();
    let (fatal, supervisor) = fatal_channel(shutdown.clone());
    let (pipeline_tx, pipeline_rx) = mpsc::channel(PIPELINE_CAPACITY);

    let poller = Poller::new(
        tzkt,
        store.clone(),
        pipeline_tx,
        poller_cfg,
        fatal.clone(),
    );
    let poller = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { poller.run(shutdown).await }
    });

    let processor = Processor::new(store, fatal, telemetry.clone());
    let processor = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { processor.run(pipeline_rx, shutdown).await }
    });

    let supervisor = tokio::spawn(supervisor.run());

    RunningWatcher {
        shutdown,
        telemetry,
        supervisor,
        poller,
        processor,
    }
}

impl RunningWatcher {
    /// Cancels the stack and returns the supervised outcome.
    pub async fn stop(self) -> Outcome {
        self.shutdown.cancel();
        let outcome = self
            .supervisor
            .await
            .expect("supervisor task should not panic");
        let _ = self.poller.await;
        let _ = self.processor.await;
        outcome
    }

    /// Waits for the supervisor to finish on its own (fatal path), then joins
    /// the component tasks.
    pub async fn wait_for_outcome(self, timeout: Duration) -> Result<Outcome> {
        let outcome = match tokio::time::timeout(timeout, self.supervisor).await {
            Ok(joined) => joined.expect("supervisor task should not panic"),
            Err(_) => bail!("supervisor did not finish within {timeout:?}"),
        };
        let _ = self.poller.await;
        let _ = self.processor.await;
        Ok(outcome)
    }
}

/// Polls `condition` until it holds or the timeout elapses.
pub async fn wait_until<F, Fut>(description: &str, timeout: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for {description}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
