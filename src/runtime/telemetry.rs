//! Tracing setup, runtime counters, and metrics exposition.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs the tracing subscriber (if one is not already active).
///
/// `RUST_LOG` takes precedence; otherwise `default_level` from the config is
/// used. Calling this function multiple times is harmless.
pub fn init_tracing(default_level: &str) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_owned()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

const REORG_MESSAGES_METRIC: &str = "watcher_received_reorg_messages_count";
const FETCHED_LEVELS_METRIC: &str = "watcher_fetched_levels_count";
const SAVED_BATCHES_METRIC: &str = "watcher_saved_batches_count";

/// Rolling counters for the ingestion pipeline.
///
/// Constructed once in `main` before any component starts, so every counter
/// exists before the first subscription message can be delivered.
#[derive(Default, Debug)]
pub struct Telemetry {
    reorg_messages: AtomicU64,
    fetched_levels: AtomicU64,
    saved_batches: AtomicU64,
}

impl Telemetry {
    pub fn record_reorg_message(&self) {
        self.reorg_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetched_level(&self) {
        self.fetched_levels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saved_batch(&self) {
        self.saved_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reorg_messages(&self) -> u64 {
        self.reorg_messages.load(Ordering::Relaxed)
    }

    pub fn fetched_levels(&self) -> u64 {
        self.fetched_levels.load(Ordering::Relaxed)
    }

    pub fn saved_batches(&self) -> u64 {
        self.saved_batches.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            reorg_messages: self.reorg_messages(),
            fetched_levels: self.fetched_levels(),
            saved_batches: self.saved_batches(),
        }
    }

    /// Renders the counters in the Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        for (name, help, value) in [
            (
                REORG_MESSAGES_METRIC,
                "Received reorg messages count",
                snapshot.reorg_messages,
            ),
            (
                FETCHED_LEVELS_METRIC,
                "Delegation levels fetched from the upstream indexer",
                snapshot.fetched_levels,
            ),
            (
                SAVED_BATCHES_METRIC,
                "Delegation batches persisted to the store",
                snapshot.saved_batches,
            ),
        ] {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }
        out
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub reorg_messages: u64,
    pub fetched_levels: u64,
    pub saved_batches: u64,
}

async fn metrics_handler(State(telemetry): State<Arc<Telemetry>>) -> String {
    telemetry.render_prometheus()
}

/// Serves `GET /metrics` on a dedicated port until the token is cancelled.
pub fn spawn_metrics_server(
    telemetry: Arc<Telemetry>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let router = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(telemetry);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(error = %err, %addr, "failed to bind metrics listener");
                return;
            }
        };

        tracing::info!(%addr, "metrics server listening");
        if let Err(err) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %err, "metrics server stopped");
        }
    })
}
