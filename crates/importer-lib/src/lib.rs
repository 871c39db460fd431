//! Importer library for agent and tool workloads
//!
//! This crate provides the core functionality for:
//! - Validating import requests and rendering cluster objects
//! - Building images from source with Shipwright
//! - Deploying, querying and deleting workloads
//! - Normalizing workload readiness
//! - Health checks and observability

pub mod build;
pub mod cluster;
pub mod descriptor;
pub mod error;
pub mod health;
pub mod labels;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod retry;
pub mod status;

pub use cluster::{ClusterClient, KubeClusterClient, ResourceKind};
#[cfg(any(test, feature = "testing"))]
pub use cluster::MemoryCluster;
pub use error::{ClusterError, ImportError, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ImporterMetrics, StructuredLogger};
pub use orchestrator::{BuildReconciler, Orchestrator, OrchestratorConfig, ReconcilerConfig};
pub use retry::RetryPolicy;
