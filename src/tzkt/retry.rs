//! Fixed-delay retry loop shared by the REST client.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryPolicy<'a> {
    pub delay: Duration,
    /// Total attempt budget; 0 means retry without bound.
    pub max_attempts: usize,
    pub cancellation: &'a CancellationToken,
}

impl<'a> RetryPolicy<'a> {
    pub(crate) fn new(
        delay: Duration,
        max_attempts: usize,
        cancellation: &'a CancellationToken,
    ) -> Self {
        Self {
            delay,
            max_attempts,
            cancellation,
        }
    }
}

/// Runs `operation` up to `max_attempts` times with a fixed delay between
/// attempts. A zero budget retries without bound, so cancellation is then the
/// only way out. Cancellation aborts both the pending delay and any further
/// attempts.
pub(crate) async fn retry_with_delay<T, F, Fut, L>(
    policy: RetryPolicy<'_>,
    mut operation: F,
    mut on_retry: L,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, &anyhow::Error),
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if policy.cancellation.is_cancelled() {
            return Err(anyhow!("retry cancelled"));
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if policy.max_attempts != 0 && attempt >= policy.max_attempts {
                    return Err(err);
                }
                on_retry(attempt, &err);
                sleep_with_cancellation(policy.delay, policy.cancellation).await?;
            }
        }
    }
}

async fn sleep_with_cancellation(delay: Duration, cancellation: &CancellationToken) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancellation.cancelled() => Err(anyhow!("retry cancelled")),
        _ = sleep(delay) => Ok(()),
    }
}
