//! Buffer Agent - autoscaling buffer reconciler
//!
//! This binary runs as a single replica in the member cluster, keeping a
//! low-priority placeholder deployment sized to one worker node so the
//! cluster autoscaler adds capacity before real workloads need it.

use anyhow::{Context, Result};
use buffer_agent::{api, config::AgentConfig, ReconcileLoopBuilder};
use buffer_lib::{BufferMetrics, HealthRegistry, KubeCluster, ReconcileLogger};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting buffer-agent");

    let config = AgentConfig::load()?;
    info!(
        namespace = %config.namespace,
        api_port = config.api_port,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();

    let metrics = BufferMetrics::new();

    let logger = ReconcileLogger::new(&config.namespace);
    logger.log_startup(AGENT_VERSION, config.reconcile_interval_secs);

    let cluster = KubeCluster::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let reconcile_loop = ReconcileLoopBuilder::new()
        .client(Arc::new(cluster))
        .namespace(&config.namespace)
        .interval(config.reconcile_interval())
        .request_timeout(config.request_timeout())
        .health_registry(health_registry.clone())
        .metrics(metrics.clone())
        .build()?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));
    let loop_handle = tokio::spawn(reconcile_loop.run(shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    if let Err(e) = loop_handle.await {
        warn!(error = %e, "Reconcile loop task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server stopped with error"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
