//! Sweep worker entry point.
//!
//! Wires the engine against in-memory collaborators for local runs; a
//! deployment swaps in the PostgreSQL store and a real broker adapter
//! through the same constructors.

use std::sync::Arc;

use async_trait::async_trait;
use bulkhead::Bulkhead;
use engine::{
    AccidentReconciler, EngineConfig, EngineRuntime, InMemoryBroker, InMemoryDispatcher,
    OutboxPublisher, ReconcileCoverage, RetryHandler, RetryOutcome, RetryScheduler,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use transfer_store::{InMemoryTransferStore, Transfer};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Default retry handler: pushes the next attempt out by five minutes.
///
/// The production backoff policy is a business concern wired in by the
/// deployment, not by this daemon.
struct FixedBackoffHandler;

#[async_trait]
impl RetryHandler for FixedBackoffHandler {
    async fn attempt(&self, transfer: &Transfer) -> RetryOutcome {
        tracing::info!(key = %transfer.key(), "retrying transfer");
        RetryOutcome::RetryAt(chrono::Utc::now() + chrono::Duration::minutes(5))
    }
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = EngineConfig::from_env();

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    prometheus_builder
        .install()
        .expect("failed to install Prometheus recorder");

    // 4. Fatal-class configuration errors stop the worker before any sweep
    let range = config.partition_range().expect("invalid partition range");
    let reconcile_config = config
        .reconcile_config()
        .expect("invalid reconcile statuses");
    let bulkhead = Bulkhead::start(config.bulkhead_config()).expect("invalid bulkhead cap");

    // 5. Wire the engine components
    let store = InMemoryTransferStore::new();
    let broker = InMemoryBroker::new();
    let dispatcher = InMemoryDispatcher::new();

    let outbox = Arc::new(OutboxPublisher::new(
        store.clone(),
        broker,
        config.outbox_config(),
    ));
    let retry = Arc::new(RetryScheduler::new(
        store.clone(),
        FixedBackoffHandler,
        config.retry_config(),
    ));
    let reconciler = Arc::new(AccidentReconciler::new(
        store.clone(),
        store,
        dispatcher,
        ReconcileCoverage::sliding(range),
        reconcile_config,
    ));

    // 6. Start the sweep loops
    tracing::info!(range = %range, "starting sweep worker");
    let runtime = EngineRuntime::start(
        outbox,
        retry,
        reconciler,
        bulkhead.clone(),
        range,
        config.schedule(),
    );

    // 7. Run until signalled, then drain
    shutdown_signal().await;
    runtime.stop().await;
    bulkhead.shutdown().await;

    tracing::info!("worker shut down gracefully");
}
