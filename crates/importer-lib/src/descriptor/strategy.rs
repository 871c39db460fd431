//! Build strategy selection from the target registry

use crate::labels::{DEFAULT_REGISTRY, INSECURE_PUSH_STRATEGY, SECURE_PUSH_STRATEGY};

/// How a registry host is reached from the build pod
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryType {
    /// Reachable inside the cluster without trusted TLS
    InCluster,
    /// Well-known public registry with valid certificates
    External,
    /// Not in the table; treated as external
    Unknown,
}

/// Hosts that live inside (or next to) the cluster
const IN_CLUSTER_HOSTS: &[&str] = &["localhost", "127.0.0.1", "kind-registry"];

const EXTERNAL_HOSTS: &[&str] = &[
    "quay.io",
    "ghcr.io",
    "docker.io",
    "registry-1.docker.io",
    "gcr.io",
    "registry.gitlab.com",
];

/// Host part of a registry reference, without port or repository path
fn registry_host(registry: &str) -> &str {
    let without_scheme = registry
        .strip_prefix("https://")
        .or_else(|| registry.strip_prefix("http://"))
        .unwrap_or(registry);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    authority.split(':').next().unwrap_or(authority)
}

pub fn classify_registry(registry: &str) -> RegistryType {
    if registry == DEFAULT_REGISTRY {
        return RegistryType::InCluster;
    }
    let host = registry_host(registry);
    if host.ends_with(".svc.cluster.local") || host.ends_with(".svc") {
        return RegistryType::InCluster;
    }
    if IN_CLUSTER_HOSTS.contains(&host) {
        return RegistryType::InCluster;
    }
    if EXTERNAL_HOSTS.contains(&host) || host.ends_with(".gcr.io") || host.ends_with(".pkg.dev") {
        return RegistryType::External;
    }
    RegistryType::Unknown
}

/// ClusterBuildStrategy for a registry; an explicit override always wins
pub fn select_strategy(registry: &str, explicit: Option<&str>) -> String {
    if let Some(strategy) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
        return strategy.to_string();
    }
    match classify_registry(registry) {
        RegistryType::InCluster => INSECURE_PUSH_STRATEGY.to_string(),
        RegistryType::External | RegistryType::Unknown => SECURE_PUSH_STRATEGY.to_string(),
    }
}
