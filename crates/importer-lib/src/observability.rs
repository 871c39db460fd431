//! Prometheus metrics and structured lifecycle logging for the importer

use crate::models::{BuildPhase, ReadyStatus};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for build and rollout waits, in seconds
const WAIT_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1800.0,
];

static GLOBAL_METRICS: OnceLock<ImporterMetricsInner> = OnceLock::new();

struct ImporterMetricsInner {
    imports_total: IntCounterVec,
    deletes_total: IntCounterVec,
    build_duration_seconds: Histogram,
    ready_wait_seconds: Histogram,
    apply_retries_total: IntCounter,
    reconcile_runs_total: IntCounter,
    reconciled_builds_total: IntCounter,
}

impl ImporterMetricsInner {
    fn new() -> Self {
        Self {
            imports_total: register_int_counter_vec!(
                "workload_importer_imports_total",
                "Import requests by deployment method and result",
                &["method", "result"]
            )
            .expect("Failed to register imports_total"),

            deletes_total: register_int_counter_vec!(
                "workload_importer_deletes_total",
                "Delete requests by result",
                &["result"]
            )
            .expect("Failed to register deletes_total"),

            build_duration_seconds: register_histogram!(
                "workload_importer_build_duration_seconds",
                "Time from BuildRun creation to a terminal phase",
                WAIT_BUCKETS.to_vec()
            )
            .expect("Failed to register build_duration_seconds"),

            ready_wait_seconds: register_histogram!(
                "workload_importer_ready_wait_seconds",
                "Time spent waiting for workloads to become ready",
                WAIT_BUCKETS.to_vec()
            )
            .expect("Failed to register ready_wait_seconds"),

            apply_retries_total: register_int_counter!(
                "workload_importer_apply_retries_total",
                "Apply calls retried after a transient cluster error"
            )
            .expect("Failed to register apply_retries_total"),

            reconcile_runs_total: register_int_counter!(
                "workload_importer_reconcile_runs_total",
                "Completed build reconciliation passes"
            )
            .expect("Failed to register reconcile_runs_total"),

            reconciled_builds_total: register_int_counter!(
                "workload_importer_reconciled_builds_total",
                "Builds deployed by the reconciliation loop"
            )
            .expect("Failed to register reconciled_builds_total"),
        }
    }
}

/// Handle to the process-wide importer metrics; clones share one registry
#[derive(Clone)]
pub struct ImporterMetrics {
    _private: (),
}

impl Default for ImporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ImporterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ImporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ImporterMetricsInner {
        GLOBAL_METRICS.get_or_init(ImporterMetricsInner::new)
    }

    /// `result` is one of accepted, rejected, ready, failed, timeout
    pub fn inc_import(&self, method: &str, result: &str) {
        self.inner()
            .imports_total
            .with_label_values(&[method, result])
            .inc();
    }

    pub fn inc_delete(&self, result: &str) {
        self.inner().deletes_total.with_label_values(&[result]).inc();
    }

    pub fn observe_build_duration(&self, secs: f64) {
        self.inner().build_duration_seconds.observe(secs);
    }

    pub fn observe_ready_wait(&self, secs: f64) {
        self.inner().ready_wait_seconds.observe(secs);
    }

    pub fn inc_apply_retries(&self) {
        self.inner().apply_retries_total.inc();
    }

    pub fn inc_reconcile_runs(&self) {
        self.inner().reconcile_runs_total.inc();
    }

    pub fn inc_reconciled_builds(&self) {
        self.inner().reconciled_builds_total.inc();
    }
}

/// Emits one `event = "..."` log line per significant lifecycle step
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_import_accepted(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        method: &str,
        build_run: Option<&str>,
    ) {
        info!(
            event = "import_accepted",
            instance = %self.instance,
            namespace = %namespace,
            name = %name,
            kind = %kind,
            method = %method,
            build_run = ?build_run,
            "Import accepted"
        );
    }

    pub fn log_import_rejected(&self, namespace: &str, name: &str, reason: &str) {
        warn!(
            event = "import_rejected",
            instance = %self.instance,
            namespace = %namespace,
            name = %name,
            reason = %reason,
            "Import rejected"
        );
    }

    pub fn log_phase_transition(&self, namespace: &str, name: &str, from: &str, to: &str) {
        info!(
            event = "phase_transition",
            instance = %self.instance,
            namespace = %namespace,
            name = %name,
            from = %from,
            to = %to,
            "Import phase changed"
        );
    }

    pub fn log_build_started(&self, namespace: &str, build: &str, build_run: &str, strategy: &str) {
        info!(
            event = "build_started",
            instance = %self.instance,
            namespace = %namespace,
            build = %build,
            build_run = %build_run,
            strategy = %strategy,
            "BuildRun created"
        );
    }

    pub fn log_build_finished(
        &self,
        namespace: &str,
        build_run: &str,
        phase: BuildPhase,
        elapsed_secs: f64,
        detail: Option<&str>,
    ) {
        match phase {
            BuildPhase::Succeeded => info!(
                event = "build_finished",
                instance = %self.instance,
                namespace = %namespace,
                build_run = %build_run,
                phase = %phase,
                elapsed_secs = elapsed_secs,
                image = ?detail,
                "Build succeeded"
            ),
            _ => warn!(
                event = "build_finished",
                instance = %self.instance,
                namespace = %namespace,
                build_run = %build_run,
                phase = %phase,
                elapsed_secs = elapsed_secs,
                detail = ?detail,
                "Build did not succeed"
            ),
        }
    }

    pub fn log_workload_applied(
        &self,
        namespace: &str,
        name: &str,
        workload_type: &str,
        image: &str,
        service: Option<&str>,
    ) {
        info!(
            event = "workload_applied",
            instance = %self.instance,
            namespace = %namespace,
            name = %name,
            workload_type = %workload_type,
            image = %image,
            service = ?service,
            "Workload applied"
        );
    }

    pub fn log_workload_ready(&self, namespace: &str, name: &str, status: ReadyStatus) {
        info!(
            event = "phase_transition",
            instance = %self.instance,
            namespace = %namespace,
            name = %name,
            ready_status = %status,
            "Workload reached a terminal readiness state"
        );
    }

    pub fn log_workload_deleted(&self, namespace: &str, name: &str, kind: &str, deleted: usize) {
        info!(
            event = "workload_deleted",
            instance = %self.instance,
            namespace = %namespace,
            name = %name,
            kind = %kind,
            deleted_resources = deleted,
            "Workload deleted"
        );
    }

    pub fn log_startup(&self, version: &str, port: u16) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            port = port,
            "Workload importer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Workload importer shutting down"
        );
    }
}
