//! Core data models for the workload importer
//!
//! Wire types use camelCase field names so they round-trip with the JSON
//! the dashboard and CLI exchange with the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Whether the imported workload is an agent or an MCP tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Agent,
    Tool,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Agent => "agent",
            WorkloadKind::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "agent" => Some(WorkloadKind::Agent),
            "tool" => Some(WorkloadKind::Tool),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the container image is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMethod {
    /// Build the image from a git repository first
    Source,
    /// Deploy an existing image
    Image,
}

impl DeploymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMethod::Source => "source",
            DeploymentMethod::Image => "image",
        }
    }
}

/// Kubernetes workload kind that runs the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    #[default]
    Deployment,
    #[serde(rename = "statefulset")]
    StatefulSet,
    Job,
}

impl WorkloadType {
    pub const ALL: [WorkloadType; 3] = [
        WorkloadType::Deployment,
        WorkloadType::StatefulSet,
        WorkloadType::Job,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadType::Deployment => "deployment",
            WorkloadType::StatefulSet => "statefulset",
            WorkloadType::Job => "job",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deployment" => Some(WorkloadType::Deployment),
            "statefulset" => Some(WorkloadType::StatefulSet),
            "job" => Some(WorkloadType::Job),
            _ => None,
        }
    }

    /// Replica-based workloads are served through a Service
    pub fn has_service(&self) -> bool {
        !matches!(self, WorkloadType::Job)
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A port exposed by the workload's Service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default = "default_port_name")]
    pub name: String,
    pub port: i32,
    pub target_port: i32,
    #[serde(default = "default_port_protocol")]
    pub protocol: String,
}

fn default_port_name() -> String {
    "http".to_string()
}

fn default_port_protocol() -> String {
    "TCP".to_string()
}

impl ServicePort {
    pub fn http(port: i32, target_port: i32) -> Self {
        Self {
            name: default_port_name(),
            port,
            target_port,
            protocol: default_port_protocol(),
        }
    }
}

/// Reference to one key of a Secret or ConfigMap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeyRef>,
}

/// Environment variable with either a direct value or a reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    pub fn direct(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }

    pub fn secret(name: impl Into<String>, secret: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(KeyRef {
                    name: secret.into(),
                    key: key.into(),
                }),
                config_map_key_ref: None,
            }),
        }
    }
}

/// Source-build settings, only meaningful for `deploymentMethod = source`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Explicit ClusterBuildStrategy, overrides registry-based selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build timeout as a duration string, e.g. `15m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_args: Vec<String>,
}

/// Immutable description of the desired workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub name: String,
    pub namespace: String,
    pub kind: WorkloadKind,
    pub deployment_method: DeploymentMethod,

    // Source fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
    /// Registry the build pushes to; defaults to the configured registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    /// Secret used to push to (and pull from) the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_secret: Option<String>,
    /// Git credentials for private repositories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_config: Option<BuildConfig>,

    // Image fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,

    #[serde(default)]
    pub workload_type: WorkloadType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_ports: Vec<ServicePort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub protocol_labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ImportRequest {
    /// A minimal image-based request, mostly useful for tests and tooling
    pub fn from_image(
        name: impl Into<String>,
        namespace: impl Into<String>,
        kind: WorkloadKind,
        image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            kind,
            deployment_method: DeploymentMethod::Image,
            git_url: None,
            git_revision: None,
            context_dir: None,
            registry: None,
            image_tag: None,
            push_secret: None,
            clone_secret: None,
            build_config: None,
            image: Some(image.into()),
            image_pull_secret: None,
            workload_type: WorkloadType::Deployment,
            service_ports: Vec::new(),
            env_vars: Vec::new(),
            protocol_labels: BTreeSet::new(),
            framework: None,
            description: None,
        }
    }

    /// A minimal source-based request
    pub fn from_source(
        name: impl Into<String>,
        namespace: impl Into<String>,
        kind: WorkloadKind,
        git_url: impl Into<String>,
        context_dir: impl Into<String>,
    ) -> Self {
        Self {
            deployment_method: DeploymentMethod::Source,
            git_url: Some(git_url.into()),
            context_dir: Some(context_dir.into()),
            image: None,
            ..Self::from_image(name, namespace, kind, "")
        }
    }
}

/// Phase of a single BuildRun
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not observed to terminate within the wait bound
    Unknown,
}

impl BuildPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildPhase::Succeeded | BuildPhase::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            BuildPhase::Unknown => 0,
            BuildPhase::Pending => 1,
            BuildPhase::Running => 2,
            BuildPhase::Succeeded | BuildPhase::Failed => 3,
        }
    }

    /// Move to `next` only if it does not go backwards; terminal phases stick
    pub fn advance(self, next: BuildPhase) -> BuildPhase {
        if self.is_terminal() || next.rank() < self.rank() {
            self
        } else {
            next
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Pending => "Pending",
            BuildPhase::Running => "Running",
            BuildPhase::Succeeded => "Succeeded",
            BuildPhase::Failed => "Failed",
            BuildPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildJob {
    pub build_name: String,
    pub build_run_name: String,
    pub phase: BuildPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

impl BuildJob {
    pub fn new(build_name: impl Into<String>, build_run_name: impl Into<String>) -> Self {
        Self {
            build_name: build_name.into(),
            build_run_name: build_run_name.into(),
            phase: BuildPhase::Pending,
            output_image: None,
            output_digest: None,
            failure_reason: None,
            failure_message: None,
            start_time: None,
            completion_time: None,
        }
    }

    /// Image reference to deploy, pinned by digest when known
    pub fn deployable_image(&self) -> Option<String> {
        let image = self.output_image.as_deref()?;
        Some(match self.output_digest.as_deref() {
            Some(digest) if !digest.is_empty() => format!("{}@{}", image, digest),
            _ => image.to_string(),
        })
    }
}

/// A status condition, normalized from any workload or build resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: None,
            message: None,
            last_transition_time: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is(&self, type_: &str, status: &str) -> bool {
        self.type_ == type_ && self.status == status
    }
}

/// Replica counters of Deployments and StatefulSets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaStatus {
    pub desired: i32,
    pub ready: i32,
    pub available: i32,
    /// Only tracked for StatefulSets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i32>,
}

/// Pod counters of Jobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
}

/// Canonical raw status of any workload type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<ReplicaStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobCounts>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// The controller has not yet observed the latest spec
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMetadata {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Service fronting a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRef {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

impl ServiceRef {
    /// In-cluster URL of the first port
    pub fn endpoint(&self) -> Option<String> {
        self.ports.first().map(|p| {
            format!(
                "http://{}.{}.svc.cluster.local:{}",
                self.name, self.namespace, p.port
            )
        })
    }
}

/// The deployed unit as read from the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRecord {
    pub metadata: RecordMetadata,
    pub workload_type: WorkloadType,
    /// `None` when the object has no (or an unreadable) status block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkloadStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ref: Option<ServiceRef>,
}

/// Normalized readiness, always recomputed from a [`WorkloadRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReadyStatus {
    Ready,
    Progressing,
    NotReady,
    Completed,
    Failed,
    Running,
    Pending,
    Unknown,
}

impl ReadyStatus {
    /// States after which waiting for readiness is pointless
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReadyStatus::Ready | ReadyStatus::Completed | ReadyStatus::Failed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ReadyStatus::Ready | ReadyStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyStatus::Ready => "Ready",
            ReadyStatus::Progressing => "Progressing",
            ReadyStatus::NotReady => "NotReady",
            ReadyStatus::Completed => "Completed",
            ReadyStatus::Failed => "Failed",
            ReadyStatus::Running => "Running",
            ReadyStatus::Pending => "Pending",
            ReadyStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ReadyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immediate answer to an import call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub status: ImportStatus,
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_run_name: Option<String>,
    /// Set when the import was awaited to completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_status: Option<ReadyStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pollable status of one logical workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub name: String,
    pub namespace: String,
    pub ready_status: ReadyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<WorkloadKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_type: Option<WorkloadType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_status: Option<ReplicaStatus>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_status: Option<BuildJob>,
}

/// Outcome of deleting one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Present but owned by a different kind; left untouched
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDeletion {
    pub kind: String,
    pub name: String,
    pub outcome: DeleteOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub status: DeleteStatus,
    pub resources: Vec<ResourceDeletion>,
}

/// One row of a workload listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSummary {
    pub name: String,
    pub namespace: String,
    pub kind: Option<WorkloadKind>,
    pub workload_type: WorkloadType,
    pub ready_status: ReadyStatus,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Result of deploying a finished source build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReport {
    pub name: String,
    pub namespace: String,
    pub build_run_name: String,
    pub build_phase: BuildPhase,
    /// False while the latest run is still pending or running
    pub deployed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Build configuration plus its latest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub name: String,
    pub namespace: String,
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_message: Option<String>,
    pub strategy: String,
    pub git_url: String,
    pub git_revision: String,
    pub context_dir: String,
    pub output_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_run: Option<BuildJob>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_phase_never_moves_backwards() {
        assert_eq!(BuildPhase::Pending.advance(BuildPhase::Running), BuildPhase::Running);
        assert_eq!(BuildPhase::Running.advance(BuildPhase::Pending), BuildPhase::Running);
        assert_eq!(BuildPhase::Succeeded.advance(BuildPhase::Running), BuildPhase::Succeeded);
        assert_eq!(BuildPhase::Failed.advance(BuildPhase::Succeeded), BuildPhase::Failed);
        assert_eq!(BuildPhase::Running.advance(BuildPhase::Unknown), BuildPhase::Running);
    }

    #[test]
    fn test_deployable_image_pins_digest() {
        let mut job = BuildJob::new("weather-tool", "weather-tool-run-1");
        assert_eq!(job.deployable_image(), None);

        job.output_image = Some("registry.local:5000/weather-tool:v0.0.1".to_string());
        assert_eq!(
            job.deployable_image().as_deref(),
            Some("registry.local:5000/weather-tool:v0.0.1")
        );

        job.output_digest = Some("sha256:abc".to_string());
        assert_eq!(
            job.deployable_image().as_deref(),
            Some("registry.local:5000/weather-tool:v0.0.1@sha256:abc")
        );
    }

    #[test]
    fn test_import_request_parses_camel_case_json() {
        let json = r#"{
            "name": "weather-tool",
            "namespace": "team1",
            "kind": "tool",
            "deploymentMethod": "source",
            "gitUrl": "https://github.com/kagenti/agent-examples",
            "contextDir": "mcp/weather_tool",
            "workloadType": "statefulset",
            "servicePorts": [{"name": "http", "port": 8000, "targetPort": 8000, "protocol": "TCP"}],
            "protocolLabels": ["mcp"]
        }"#;

        let req: ImportRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.kind, WorkloadKind::Tool);
        assert_eq!(req.deployment_method, DeploymentMethod::Source);
        assert_eq!(req.workload_type, WorkloadType::StatefulSet);
        assert_eq!(req.service_ports[0].target_port, 8000);
        assert!(req.protocol_labels.contains("mcp"));
        assert!(req.image.is_none());
    }

    #[test]
    fn test_ready_status_serializes_as_pascal_case() {
        assert_eq!(
            serde_json::to_string(&ReadyStatus::NotReady).unwrap(),
            "\"NotReady\""
        );
        assert!(ReadyStatus::Completed.is_terminal());
        assert!(!ReadyStatus::Running.is_terminal());
    }

    #[test]
    fn test_service_endpoint_uses_first_port() {
        let svc = ServiceRef {
            name: "weather-tool-mcp".to_string(),
            namespace: "team1".to_string(),
            cluster_ip: None,
            ports: vec![ServicePort::http(8000, 8000)],
        };
        assert_eq!(
            svc.endpoint().as_deref(),
            Some("http://weather-tool-mcp.team1.svc.cluster.local:8000")
        );
    }
}
