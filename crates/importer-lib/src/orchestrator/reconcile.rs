//! Build reconciliation loop
//!
//! Deploys source imports whose build finished while nobody was waiting for
//! it, e.g. because the importer restarted mid-build. Each pass lists the
//! managed Builds and finalizes those with a succeeded latest run and no
//! workload yet.

use super::delete::marked_for_deletion;
use super::Orchestrator;
use crate::cluster::ResourceKind;
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::labels;
use crate::models::BuildPhase;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Time between passes (default: 30 seconds)
    pub interval: Duration,
    pub enabled: bool,
    /// Namespaces to scan; empty scans all namespaces
    pub namespaces: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            enabled: true,
            namespaces: Vec::new(),
        }
    }
}

pub struct BuildReconciler {
    orchestrator: Orchestrator,
    config: ReconcilerConfig,
    health: Option<HealthRegistry>,
}

impl BuildReconciler {
    pub fn new(orchestrator: Orchestrator, config: ReconcilerConfig) -> Self {
        Self {
            orchestrator,
            config,
            health: None,
        }
    }

    /// Report pass outcomes as the `reconciler` health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run passes until a shutdown signal arrives
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("Build reconciliation disabled");
            return;
        }
        info!(
            interval_secs = self.config.interval.as_secs(),
            namespaces = ?self.config.namespaces,
            "Starting build reconciliation loop"
        );

        let mut ticker = interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.reconcile_once().await;
                    self.report(outcome).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down build reconciliation loop");
                    break;
                }
            }
        }
    }

    async fn report(&self, outcome: Result<PassSummary>) {
        let Some(health) = &self.health else {
            return;
        };
        match outcome {
            Ok(summary) if summary.failed == 0 => health.set_healthy(components::RECONCILER).await,
            Ok(summary) => {
                health
                    .set_degraded(
                        components::RECONCILER,
                        format!("{} builds failed to finalize", summary.failed),
                    )
                    .await
            }
            Err(e) => {
                health
                    .set_degraded(components::RECONCILER, format!("reconciliation failed: {}", e))
                    .await
            }
        }
    }

    /// One pass over all configured namespaces
    pub async fn reconcile_once(&self) -> Result<PassSummary> {
        let mut summary = PassSummary::default();
        if self.config.namespaces.is_empty() {
            self.reconcile_namespace(None, &mut summary).await?;
        } else {
            for namespace in &self.config.namespaces {
                self.reconcile_namespace(Some(namespace), &mut summary).await?;
            }
        }

        let metrics = &self.orchestrator.metrics;
        metrics.inc_reconcile_runs();
        for _ in 0..summary.finalized {
            metrics.inc_reconciled_builds();
        }
        debug!(
            scanned = summary.scanned,
            finalized = summary.finalized,
            failed = summary.failed,
            "Build reconciliation pass complete"
        );
        Ok(summary)
    }

    async fn reconcile_namespace(
        &self,
        namespace: Option<&str>,
        summary: &mut PassSummary,
    ) -> Result<()> {
        let orchestrator = &self.orchestrator;
        let selector = format!(
            "{}={}",
            labels::MANAGED_BY,
            orchestrator.config.descriptors.managed_by
        );
        let builds = orchestrator
            .cluster
            .list(ResourceKind::Build, namespace, &selector)
            .await?;

        for build in builds {
            let (Some(ns), Some(name)) = (
                build.metadata.namespace.as_deref(),
                build.metadata.name.as_deref(),
            ) else {
                continue;
            };
            summary.scanned += 1;
            if marked_for_deletion(&build) {
                debug!(namespace = %ns, name = %name, "Skipping Build being deleted");
                continue;
            }

            match self.reconcile_build(ns, name).await {
                Ok(true) => {
                    info!(namespace = %ns, name = %name, "Deployed finished build");
                    summary.finalized += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(namespace = %ns, name = %name, error = %e, "Failed to reconcile build");
                    summary.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Finalize one Build if it needs it; returns whether it was deployed
    async fn reconcile_build(&self, namespace: &str, name: &str) -> Result<bool> {
        let orchestrator = &self.orchestrator;
        if orchestrator.find_workload(namespace, name).await?.is_some() {
            return Ok(false);
        }
        let latest = orchestrator.builds.latest(namespace, name).await?;
        if latest.map(|job| job.phase) != Some(BuildPhase::Succeeded) {
            return Ok(false);
        }
        Ok(orchestrator.finalize(namespace, name).await?.deployed)
    }
}

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub scanned: usize,
    pub finalized: usize,
    pub failed: usize,
}
