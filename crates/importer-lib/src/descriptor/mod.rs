//! Resource descriptor builder
//!
//! Turns an [`ImportRequest`] into the concrete cluster objects that realize
//! it. Nothing here performs I/O.

pub mod manifests;
pub mod strategy;
pub mod validation;

use crate::cluster::ResourceKind;
use crate::error::ValidationError;
use crate::labels;
use crate::models::{DeploymentMethod, ImportRequest, ServicePort, WorkloadKind};
use kube::api::DynamicObject;
use std::ops::Deref;

/// Settings that shape rendered objects but are not part of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorConfig {
    pub default_registry: String,
    pub default_image_tag: String,
    /// Value of the managed-by marker, scopes list and delete operations
    pub managed_by: String,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            default_registry: labels::DEFAULT_REGISTRY.to_string(),
            default_image_tag: labels::DEFAULT_IMAGE_TAG.to_string(),
            managed_by: labels::DEFAULT_MANAGED_BY.to_string(),
        }
    }
}

/// An import request that passed validation, with defaults filled in
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedImport(ImportRequest);

impl ValidatedImport {
    pub fn new(req: ImportRequest) -> Result<Self, ValidationError> {
        validation::validate(&req)?;
        Ok(Self(with_defaults(req)))
    }

    pub fn request(&self) -> &ImportRequest {
        &self.0
    }

    pub fn into_inner(self) -> ImportRequest {
        self.0
    }

    pub fn is_source(&self) -> bool {
        self.0.deployment_method == DeploymentMethod::Source
    }
}

impl Deref for ValidatedImport {
    type Target = ImportRequest;

    fn deref(&self) -> &ImportRequest {
        &self.0
    }
}

fn with_defaults(mut req: ImportRequest) -> ImportRequest {
    if req.service_ports.is_empty() {
        req.service_ports = vec![default_port(req.kind)];
    }
    if req.kind == WorkloadKind::Tool {
        req.protocol_labels.insert(labels::MCP_PROTOCOL.to_string());
    }
    if req.deployment_method == DeploymentMethod::Source {
        req.git_revision.get_or_insert_with(|| "main".to_string());
        req.context_dir.get_or_insert_with(|| ".".to_string());
    }
    req
}

/// Agents listen on 8000 behind Service port 8080; tools on 8000 directly
pub fn default_port(kind: WorkloadKind) -> ServicePort {
    match kind {
        WorkloadKind::Agent => ServicePort::http(8080, 8000),
        WorkloadKind::Tool => ServicePort::http(8000, 8000),
    }
}

#[derive(Debug, Clone)]
pub struct BuildDescriptor {
    pub object: DynamicObject,
    pub strategy: String,
    /// Image reference the build will push, before digest pinning
    pub output_image: String,
}

/// Everything one import applies to the cluster
#[derive(Debug, Clone)]
pub struct ResourceSet {
    pub build: Option<BuildDescriptor>,
    pub workload_kind: ResourceKind,
    pub workload: DynamicObject,
    pub service: Option<DynamicObject>,
}

/// Validate `req` and render its objects
///
/// For source imports the workload references the planned output image; the
/// orchestrator re-renders it with the digest-pinned image once the build
/// has succeeded.
pub fn build(req: &ImportRequest, cfg: &DescriptorConfig) -> Result<ResourceSet, ValidationError> {
    let validated = ValidatedImport::new(req.clone())?;
    Ok(render(&validated, cfg))
}

pub fn render(req: &ValidatedImport, cfg: &DescriptorConfig) -> ResourceSet {
    let build = req.is_source().then(|| manifests::build(req, cfg));
    let image = match &build {
        Some(b) => b.output_image.clone(),
        None => req.image.clone().unwrap_or_default(),
    };
    ResourceSet {
        workload_kind: ResourceKind::for_workload(req.workload_type),
        workload: manifests::workload(req, &image, cfg),
        service: manifests::service(req, cfg),
        build,
    }
}
