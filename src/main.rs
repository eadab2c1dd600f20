//! delegation-watcher entry point.
//!
//! Wires the store, the TzKT client, the poller, the processor, the read API,
//! and the supervisor together under one root cancellation token.

use anyhow::Context;
use delegation_watcher::api::{self, ApiState};
use delegation_watcher::{
    fatal_channel, init_tracing, spawn_metrics_server, Outcome, Poller, PostgresStore, Processor,
    Telemetry, TzktClient, WatcherConfig,
};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the pipeline channel between the TzKT client and the processor.
const PIPELINE_CAPACITY: usize = 100;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match WatcherConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.log.level);

    match run(config).await {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Fatal(_)) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: WatcherConfig) -> anyhow::Result<Outcome> {
    // Counters must exist before the first subscription message can arrive.
    let telemetry = Arc::new(Telemetry::default());

    let store = Arc::new(
        PostgresStore::connect(&config.db)
            .await
            .context("failed to initialize Postgres store")?,
    );

    let shutdown = CancellationToken::new();
    let (fatal, supervisor) = fatal_channel(shutdown.clone());
    let (pipeline_tx, pipeline_rx) = mpsc::channel(PIPELINE_CAPACITY);

    let tzkt = Arc::new(
        TzktClient::new(&config.tzkt, telemetry.clone())
            .context("failed to build TzKT client")?,
    );

    let poller = Poller::new(
        tzkt,
        store.clone(),
        pipeline_tx,
        config.poller.clone(),
        fatal.clone(),
    );
    let poller_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { poller.run(shutdown).await }
    });

    let processor = Processor::new(store.clone(), fatal.clone(), telemetry.clone());
    let processor_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { processor.run(pipeline_rx, shutdown).await }
    });

    let metrics_addr = SocketAddr::new(config.server.host, config.metrics.port);
    let metrics_handle = spawn_metrics_server(telemetry.clone(), metrics_addr, shutdown.clone());

    let api_state = ApiState {
        store: store.clone(),
        min_valid_year: config.validation.min_valid_year,
    };
    let api_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        let fatal = fatal.clone();
        let addr = config.server.listen_addr();
        async move {
            if let Err(err) = api::serve(api_state, addr, shutdown).await {
                fatal.report(err.context("API server stopped")).await;
            }
        }
    });

    let signal_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("signal received; shutting down");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        }
    });

    let outcome = supervisor.run().await;

    for handle in [
        poller_handle,
        processor_handle,
        metrics_handle,
        api_handle,
        signal_handle,
    ] {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "task terminated unexpectedly");
        }
    }

    Ok(outcome)
}
