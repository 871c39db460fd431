//! Label and annotation keys, plus the fixed defaults stamped on resources

pub const TYPE: &str = "kagenti.io/type";
pub const FRAMEWORK: &str = "kagenti.io/framework";
pub const WORKLOAD_TYPE: &str = "kagenti.io/workload-type";
pub const TRANSPORT: &str = "kagenti.io/transport";
/// Set on BuildRuns, names the Build they execute
pub const BUILD_NAME: &str = "kagenti.io/build-name";
/// Prefix of the per-protocol boolean labels, e.g. `protocol.kagenti.io/mcp`
pub const PROTOCOL_PREFIX: &str = "protocol.kagenti.io/";

pub const APP_NAME: &str = "app.kubernetes.io/name";
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const CREATED_BY: &str = "app.kubernetes.io/created-by";
pub const COMPONENT: &str = "app.kubernetes.io/component";

pub const DESCRIPTION_ANNOTATION: &str = "kagenti.io/description";
/// Links a workload to the Build its image came from
pub const BUILD_ANNOTATION: &str = "kagenti.io/build";
/// Validated request JSON stored on the Build
pub const IMPORT_REQUEST_ANNOTATION: &str = "kagenti.io/import-request";
/// Set on a Build while its workload is being deleted
pub const DELETING_ANNOTATION: &str = "kagenti.io/deleting";

pub const MCP_PROTOCOL: &str = "mcp";
pub const STREAMABLE_HTTP: &str = "streamable_http";
/// Suffix of the Service exposing a tool's MCP endpoint
pub const TOOL_SERVICE_SUFFIX: &str = "-mcp";

pub const INSECURE_PUSH_STRATEGY: &str = "buildah-insecure-push";
pub const SECURE_PUSH_STRATEGY: &str = "buildah";
pub const DEFAULT_REGISTRY: &str = "registry.cr-system.svc.cluster.local:5000";
pub const DEFAULT_IMAGE_TAG: &str = "v0.0.1";
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_BUILD_TIMEOUT: &str = "15m";
pub const DEFAULT_MANAGED_BY: &str = "workload-importer";

pub fn protocol_label(protocol: &str) -> String {
    format!("{}{}", PROTOCOL_PREFIX, protocol)
}

/// Protocols encoded in a label map
pub fn protocols_of<'a>(
    labels: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> Vec<String> {
    labels
        .into_iter()
        .filter_map(|(k, _)| k.strip_prefix(PROTOCOL_PREFIX).map(str::to_string))
        .collect()
}

/// Selector matching everything of one kind created by this component
pub fn kind_selector(kind: crate::models::WorkloadKind, managed_by: &str) -> String {
    format!("{}={},{}={}", TYPE, kind.as_str(), MANAGED_BY, managed_by)
}

pub fn build_runs_selector(build_name: &str) -> String {
    format!("{}={}", BUILD_NAME, build_name)
}
