use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use topic_gate_gateway::api::{self, ApiState};
use topic_gate_gateway::broker::{memory::DEFAULT_MAX_RECORDS_PER_TOPIC, InMemoryBroker};
use topic_gate_gateway::config::{GatewayConfig, LedgerBackend};
use topic_gate_gateway::gateway::Gateway;
use topic_gate_gateway::guard::QuotaGuard;
use topic_gate_gateway::ledger::{MemoryUsageStore, UsageLedger, UsageStore};
use topic_gate_gateway::storage::SqliteUsageStore;
use topic_gate_gateway::tracker::ConnectionTracker;

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env()?;
    init_tracing(&config.log_level)?;

    let host = config.server_host.clone();
    let port = config.server_port;

    info!(
        host = %host,
        port,
        backend = ?config.ledger_backend,
        data_dir = %config.data_dir.display(),
        "starting topic-gate gateway"
    );

    let store: Arc<dyn UsageStore> = match config.ledger_backend {
        LedgerBackend::Sqlite => Arc::new(
            SqliteUsageStore::new(config.data_dir.clone())
                .context("failed to open usage ledger")?,
        ),
        LedgerBackend::Memory => Arc::new(MemoryUsageStore::new()),
    };
    let ledger = UsageLedger::new(store, config.limits());
    let tracker = ConnectionTracker::new(config.max_streams_per_tenant);
    let broker = Arc::new(InMemoryBroker::new(
        config.topic_retention(),
        DEFAULT_MAX_RECORDS_PER_TOPIC,
    ));
    let gateway = Gateway::new(
        QuotaGuard::new(ledger),
        tracker.clone(),
        broker,
        config.gateway_options(),
    );

    let _watchdog = tracker.start_watchdog(config.watchdog_interval(), config.stale_after());

    let state = Arc::new(ApiState::new(gateway, config));
    let _rate_limit_eviction = state.limiter.start_eviction();
    let router = api::create_router(state);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;

    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(tracker))
        .await?;

    info!("topic-gate gateway shut down");
    Ok(())
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM and ends every live stream so the server can
/// drain.
async fn shutdown_signal(tracker: ConnectionTracker) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(active_streams = tracker.total_active(), "shutdown signal received");
    tracker.shutdown();
}
