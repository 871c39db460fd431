//! HTTP API for imports, workload queries, health checks and Prometheus metrics

use importer_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::ImporterMetrics,
    ImportError, ImportRequest, ImportResponse, ImportStatus, Orchestrator, ValidationError,
    WorkloadKind,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: ImporterMetrics,
    pub orchestrator: Orchestrator,
    /// Cancels builds still being finished in the background
    pub background: CancellationToken,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: ImporterMetrics,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            orchestrator,
            background: CancellationToken::new(),
        }
    }
}

/// Import failure rendered as a JSON error body
pub struct ApiError(ImportError);

impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self(ImportError::Validation(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status_code = match &err {
            ImportError::Validation(_) => StatusCode::BAD_REQUEST,
            ImportError::NotFound { .. } => StatusCode::NOT_FOUND,
            ImportError::BuildFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ImportError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ImportError::Apply { .. } | ImportError::Cluster(_) => StatusCode::BAD_GATEWAY,
        };

        let mut body = json!({
            "error": err.to_string(),
            "kind": err.kind(),
            "retrySafe": err.is_retry_safe(),
        });
        if let ImportError::Validation(validation) = &err {
            body["status"] = json!(ImportStatus::Rejected);
            body["violations"] = json!(validation.violations);
        }

        (status_code, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving imports
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportParams {
    #[serde(default)]
    pub wait: bool,
    pub timeout_secs: Option<u64>,
}

async fn create_import(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ImportParams>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<(StatusCode, Json<ImportResponse>)> {
    let orchestrator = &state.orchestrator;

    if params.wait {
        let timeout = params.timeout_secs.map(Duration::from_secs).unwrap_or_else(|| {
            orchestrator.config().build_timeout + orchestrator.config().ready_timeout
        });
        let report = orchestrator
            .import_and_wait(req, timeout, state.background.child_token())
            .await?;
        let response = ImportResponse {
            status: ImportStatus::Accepted,
            name: report.name,
            namespace: report.namespace,
            build_run_name: report.build_status.map(|job| job.build_run_name),
            ready_status: Some(report.ready_status),
            error: None,
        };
        return Ok((StatusCode::OK, Json(response)));
    }

    let namespace = req.namespace.clone();
    let name = req.name.clone();
    let response = orchestrator.import(req).await?;

    if let Some(run) = response.build_run_name.clone() {
        let orchestrator = orchestrator.clone();
        let cancel = state.background.child_token();
        tokio::spawn(async move {
            match orchestrator.finish_build(&namespace, &name, &run, cancel).await {
                Ok(report) if report.deployed => {
                    info!(namespace = %namespace, name = %name, build_run = %run, "Deployed built image")
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(namespace = %namespace, name = %name, build_run = %run, error = %e, "Background build did not deploy")
                }
            }
        });
    }

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Default, Deserialize)]
pub struct KindParams {
    pub namespace: Option<String>,
    pub kind: Option<String>,
}

impl KindParams {
    fn kind(&self) -> Result<Option<WorkloadKind>, ValidationError> {
        match self.kind.as_deref() {
            None | Some("") => Ok(None),
            Some(value) => WorkloadKind::parse(value)
                .map(Some)
                .ok_or_else(|| ValidationError::single("kind", "must be 'agent' or 'tool'")),
        }
    }
}

async fn list_workloads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<KindParams>,
) -> ApiResult<impl IntoResponse> {
    let kind = params.kind()?;
    let namespace = params.namespace.as_deref().filter(|ns| !ns.is_empty());
    let workloads = state.orchestrator.list(namespace, kind).await?;
    Ok(Json(workloads))
}

async fn workload_status(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.status(&namespace, &name).await?))
}

async fn delete_workload(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Query(params): Query<KindParams>,
) -> ApiResult<impl IntoResponse> {
    let kind = params
        .kind()?
        .ok_or_else(|| ValidationError::single("kind", "is required for delete"))?;
    Ok(Json(state.orchestrator.delete(&namespace, &name, kind).await?))
}

async fn build_info(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.builds().info(&namespace, &name).await?))
}

async fn trigger_build(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let job = state
        .orchestrator
        .builds()
        .trigger_existing(&namespace, &name)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn finalize_build(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.finalize(&namespace, &name).await?))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/imports", post(create_import))
        .route("/api/v1/workloads", get(list_workloads))
        .route(
            "/api/v1/workloads/:namespace/:name",
            get(workload_status).delete(delete_workload),
        )
        .route("/api/v1/builds/:namespace/:name", get(build_info))
        .route("/api/v1/builds/:namespace/:name/runs", post(trigger_build))
        .route("/api/v1/builds/:namespace/:name/finalize", post(finalize_build))
        .with_state(state)
}

/// Start the API server; returns once `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let background = state.background.clone();
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    background.cancel();
    Ok(())
}
