//! Fatal-error channel and the supervisor that acts on it.
//!
//! Components hold a [`FatalErrorSender`]; the [`Supervisor`] owns the
//! receiver and the root cancellation token. The first reported error cancels
//! the token so every component unwinds, and the process exits non-zero.

use anyhow::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the fatal-error channel. Two slots keep a second writer from
/// blocking while the supervisor reacts to the first error.
pub const FATAL_CHANNEL_CAPACITY: usize = 2;

/// Write half of the fatal-error channel.
#[derive(Debug, Clone)]
pub struct FatalErrorSender {
    tx: mpsc::Sender<Error>,
}

impl FatalErrorSender {
    /// Reports a fatal error. Delivery failure is logged, not propagated:
    /// a missing supervisor means shutdown is already under way.
    pub async fn report(&self, error: Error) {
        tracing::error!(error = %error, "fatal pipeline error");
        if self.tx.send(error).await.is_err() {
            tracing::warn!("supervisor gone; fatal error not delivered");
        }
    }
}

/// How the supervised run ended.
#[derive(Debug)]
pub enum Outcome {
    /// Context cancelled by an external signal; exit 0.
    Clean,
    /// A component reported a fatal error; exit non-zero.
    Fatal(Error),
}

impl Outcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }
}

/// Watches the fatal-error channel and the root token.
pub struct Supervisor {
    shutdown: CancellationToken,
    rx: mpsc::Receiver<Error>,
}

/// Creates the fatal-error channel and its supervisor bound to `shutdown`.
pub fn fatal_channel(shutdown: CancellationToken) -> (FatalErrorSender, Supervisor) {
    let (tx, rx) = mpsc::channel(FATAL_CHANNEL_CAPACITY);
    (FatalErrorSender { tx }, Supervisor { shutdown, rx })
}

impl Supervisor {
    /// Runs until the first fatal error or until the root token is cancelled.
    /// On fatal error the token is cancelled before returning so every
    /// component unwinds.
    pub async fn run(mut self) -> Outcome {
        tokio::select! {
            Some(error) = self.rx.recv() => {
                tracing::error!(error = %error, "fatal error; initiating shutdown");
                self.shutdown.cancel();
                Outcome::Fatal(error)
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("shutdown completed");
                Outcome::Clean
            }
        }
    }
}
