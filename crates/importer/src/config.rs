//! Importer configuration

use anyhow::{Context, Result};
use importer_lib::descriptor::DescriptorConfig;
use importer_lib::labels;
use importer_lib::{OrchestratorConfig, ReconcilerConfig, RetryPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Importer configuration, read from `IMPORTER_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ImporterConfig {
    /// Port of the import API, health and metrics endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Registry source builds push to when a request names none
    #[serde(default = "default_registry")]
    pub default_registry: String,

    #[serde(default = "default_image_tag")]
    pub default_image_tag: String,

    /// Value of the managed-by label on every created resource
    #[serde(default = "default_managed_by")]
    pub managed_by: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_delete_timeout")]
    pub delete_timeout_secs: u64,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_true")]
    pub enable_build_reconciliation: bool,

    /// Comma separated; empty reconciles all namespaces
    #[serde(default)]
    pub reconcile_namespaces: Vec<String>,

    #[serde(default = "default_apply_max_attempts")]
    pub apply_max_attempts: u32,

    #[serde(default = "default_apply_initial_backoff")]
    pub apply_initial_backoff_ms: u64,

    #[serde(default = "default_apply_max_backoff")]
    pub apply_max_backoff_ms: u64,

    /// Pod name from the Kubernetes downward API
    #[serde(default = "default_instance")]
    pub instance: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_registry() -> String {
    labels::DEFAULT_REGISTRY.to_string()
}

fn default_image_tag() -> String {
    labels::DEFAULT_IMAGE_TAG.to_string()
}

fn default_managed_by() -> String {
    labels::DEFAULT_MANAGED_BY.to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_build_timeout() -> u64 {
    900
}

fn default_ready_timeout() -> u64 {
    300
}

fn default_delete_timeout() -> u64 {
    60
}

fn default_reconcile_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_apply_max_attempts() -> u32 {
    4
}

fn default_apply_initial_backoff() -> u64 {
    500
}

fn default_apply_max_backoff() -> u64 {
    8000
}

fn default_instance() -> String {
    std::env::var("POD_NAME").unwrap_or_else(|_| "workload-importer".to_string())
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            default_registry: default_registry(),
            default_image_tag: default_image_tag(),
            managed_by: default_managed_by(),
            poll_interval_secs: default_poll_interval(),
            build_timeout_secs: default_build_timeout(),
            ready_timeout_secs: default_ready_timeout(),
            delete_timeout_secs: default_delete_timeout(),
            reconcile_interval_secs: default_reconcile_interval(),
            enable_build_reconciliation: default_true(),
            reconcile_namespaces: Vec::new(),
            apply_max_attempts: default_apply_max_attempts(),
            apply_initial_backoff_ms: default_apply_initial_backoff(),
            apply_max_backoff_ms: default_apply_max_backoff(),
            instance: default_instance(),
        }
    }
}

impl ImporterConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("IMPORTER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("reconcile_namespaces"),
            )
            .build()
            .context("failed to read IMPORTER_* environment")?;

        config
            .try_deserialize()
            .context("invalid importer configuration")
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            descriptors: DescriptorConfig {
                default_registry: self.default_registry.clone(),
                default_image_tag: self.default_image_tag.clone(),
                managed_by: self.managed_by.clone(),
            },
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            build_timeout: Duration::from_secs(self.build_timeout_secs),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
            delete_timeout: Duration::from_secs(self.delete_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.apply_max_attempts.max(1),
                initial_backoff: Duration::from_millis(self.apply_initial_backoff_ms),
                max_backoff: Duration::from_millis(self.apply_max_backoff_ms),
            },
            instance: self.instance.clone(),
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: Duration::from_secs(self.reconcile_interval_secs.max(1)),
            enabled: self.enable_build_reconciliation,
            namespaces: self
                .reconcile_namespaces
                .iter()
                .map(|ns| ns.trim().to_string())
                .filter(|ns| !ns.is_empty())
                .collect(),
        }
    }
}
