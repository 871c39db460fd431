//! Import orchestrator
//!
//! One [`Orchestrator`] serves any number of concurrent import, delete and
//! status calls. It holds no per-workload state: every call reads what it
//! needs from the cluster and leaves its results there.
//!
//! An import moves through [`ImportPhase`]s:
//!
//! ```text
//! Validating -> Building (source only) -> Deploying -> AwaitingReady -> Done
//!      \______________\_____________________\_______________\-> Failed
//! ```

mod delete;
mod import;
mod query;
pub mod reconcile;

#[cfg(test)]
mod tests;

pub use reconcile::{BuildReconciler, PassSummary, ReconcilerConfig};

use crate::build::BuildController;
use crate::cluster::ClusterClient;
use crate::descriptor::DescriptorConfig;
use crate::observability::{ImporterMetrics, StructuredLogger};
use crate::retry::RetryPolicy;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub descriptors: DescriptorConfig,
    /// Cadence of BuildRun, rollout and deletion polls
    pub poll_interval: Duration,
    pub build_timeout: Duration,
    pub ready_timeout: Duration,
    pub delete_timeout: Duration,
    pub retry: RetryPolicy,
    /// Identifies this process in lifecycle logs
    pub instance: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            descriptors: DescriptorConfig::default(),
            poll_interval: Duration::from_secs(5),
            build_timeout: Duration::from_secs(900),
            ready_timeout: Duration::from_secs(300),
            delete_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            instance: "workload-importer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Validating,
    Building,
    Deploying,
    AwaitingReady,
    Done,
    Failed,
}

impl ImportPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPhase::Validating => "Validating",
            ImportPhase::Building => "Building",
            ImportPhase::Deploying => "Deploying",
            ImportPhase::AwaitingReady => "AwaitingReady",
            ImportPhase::Done => "Done",
            ImportPhase::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportPhase::Done | ImportPhase::Failed)
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of one import call; every change is logged
struct PhaseTracker<'a> {
    logger: &'a StructuredLogger,
    namespace: String,
    name: String,
    phase: ImportPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(logger: &'a StructuredLogger, namespace: &str, name: &str) -> Self {
        Self {
            logger,
            namespace: namespace.to_string(),
            name: name.to_string(),
            phase: ImportPhase::Validating,
        }
    }

    /// Terminal phases are final
    fn enter(&mut self, next: ImportPhase) {
        if self.phase.is_terminal() || self.phase == next {
            return;
        }
        self.logger
            .log_phase_transition(&self.namespace, &self.name, self.phase.as_str(), next.as_str());
        self.phase = next;
    }

    fn fail<E>(&mut self, err: E) -> E {
        self.enter(ImportPhase::Failed);
        err
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    cluster: Arc<dyn ClusterClient>,
    config: OrchestratorConfig,
    builds: BuildController,
    metrics: ImporterMetrics,
    logger: StructuredLogger,
}

impl Orchestrator {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: OrchestratorConfig) -> Self {
        let logger = StructuredLogger::new(config.instance.clone());
        let builds = BuildController::new(
            cluster.clone(),
            config.descriptors.clone(),
            config.poll_interval,
            config.retry.clone(),
            logger.clone(),
        );
        Self {
            cluster,
            config,
            builds,
            metrics: ImporterMetrics::new(),
            logger,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn builds(&self) -> &BuildController {
        &self.builds
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.cluster
    }
}
