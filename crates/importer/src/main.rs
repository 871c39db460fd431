//! Workload Importer - deploys agents and MCP tools from images or source
//!
//! Runs as a Deployment in the management namespace, serving the import API
//! and deploying source builds that finished while nobody was waiting.

use anyhow::{Context, Result};
use importer_lib::{
    health::{components, HealthRegistry},
    observability::{ImporterMetrics, StructuredLogger},
    BuildReconciler, ClusterClient, KubeClusterClient, Orchestrator,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use workload_importer::{api, config::ImporterConfig};

const IMPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting workload-importer");

    let config = ImporterConfig::load()?;
    info!(
        instance = %config.instance,
        registry = %config.default_registry,
        managed_by = %config.managed_by,
        "Importer configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CLUSTER).await;
    health_registry.register(components::RECONCILER).await;
    health_registry.register(components::API).await;

    let cluster = KubeClusterClient::try_default(config.managed_by.clone())
        .await
        .context("failed to create Kubernetes client")?;
    match cluster.ping().await {
        Ok(()) => health_registry.set_healthy(components::CLUSTER).await,
        Err(e) => {
            warn!(error = %e, "Kubernetes API not reachable at startup");
            health_registry
                .set_degraded(components::CLUSTER, format!("ping failed: {}", e))
                .await;
        }
    }

    let metrics = ImporterMetrics::new();
    let logger = StructuredLogger::new(config.instance.clone());
    logger.log_startup(IMPORTER_VERSION, config.api_port);

    let orchestrator = Orchestrator::new(Arc::new(cluster), config.orchestrator());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let reconciler = BuildReconciler::new(orchestrator.clone(), config.reconciler())
        .with_health(health_registry.clone());
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        orchestrator,
    ));

    health_registry.set_healthy(components::API).await;
    health_registry.set_ready(true).await;

    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        let _ = api_shutdown.recv().await;
    }));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = reconciler_handle.await {
        warn!(error = %e, "Reconciler task ended abnormally");
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server stopped with error"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }
    info!("Shutting down");

    Ok(())
}
