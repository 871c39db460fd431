//! Cluster resource client
//!
//! The orchestrator talks to the cluster only through [`ClusterClient`].
//! Objects are untyped [`DynamicObject`]s addressed by a [`ResourceKind`], so
//! Shipwright custom resources and built-in workloads share one surface.

pub mod kube_client;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
#[cfg(any(test, feature = "testing"))]
pub mod selector;

pub use kube_client::KubeClusterClient;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryCluster;

use crate::error::ClusterError;
use crate::models::WorkloadType;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const SHIPWRIGHT_GROUP: &str = "shipwright.io";
pub const SHIPWRIGHT_VERSION: &str = "v1beta1";

/// Resource kinds the importer reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Build,
    BuildRun,
    Deployment,
    StatefulSet,
    Job,
    Service,
}

impl ResourceKind {
    pub fn api_resource(&self) -> ApiResource {
        match self {
            ResourceKind::Build => ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk(SHIPWRIGHT_GROUP, SHIPWRIGHT_VERSION, "Build"),
                "builds",
            ),
            ResourceKind::BuildRun => ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk(SHIPWRIGHT_GROUP, SHIPWRIGHT_VERSION, "BuildRun"),
                "buildruns",
            ),
            ResourceKind::Deployment => ApiResource::erase::<Deployment>(&()),
            ResourceKind::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
            ResourceKind::Job => ApiResource::erase::<Job>(&()),
            ResourceKind::Service => ApiResource::erase::<Service>(&()),
        }
    }

    pub fn for_workload(workload_type: WorkloadType) -> Self {
        match workload_type {
            WorkloadType::Deployment => ResourceKind::Deployment,
            WorkloadType::StatefulSet => ResourceKind::StatefulSet,
            WorkloadType::Job => ResourceKind::Job,
        }
    }

    pub fn workload_type(&self) -> Option<WorkloadType> {
        match self {
            ResourceKind::Deployment => Some(WorkloadType::Deployment),
            ResourceKind::StatefulSet => Some(WorkloadType::StatefulSet),
            ResourceKind::Job => Some(WorkloadType::Job),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Build => "Build",
            ResourceKind::BuildRun => "BuildRun",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::StatefulSet => "StatefulSet",
            ResourceKind::Job => "Job",
            ResourceKind::Service => "Service",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    NotFound,
}

/// Bounds of a wait: poll cadence, deadline and an external cancel signal
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("condition not met after {}s", .elapsed.as_secs())]
    TimedOut { elapsed: Duration, cancelled: bool },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Predicate over the current state of an object; `None` means absent
pub type ObjectPredicate<'a> = &'a (dyn Fn(Option<&DynamicObject>) -> bool + Send + Sync);

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create-or-update; applying an identical object twice is a no-op
    async fn apply(&self, kind: ResourceKind, obj: &DynamicObject)
        -> Result<DynamicObject, ClusterError>;

    /// Create only; fails with a 409 error if the name is taken
    async fn create(&self, kind: ResourceKind, obj: &DynamicObject)
        -> Result<DynamicObject, ClusterError>;

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    /// Merge `annotations` into an existing object; `None` if it is absent
    async fn annotate(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    /// Deleting an absent object is not an error
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Deletion, ClusterError>;

    /// `namespace = None` lists across all namespaces
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    /// Cheap connectivity probe used by health checks
    async fn ping(&self) -> Result<(), ClusterError> {
        Ok(())
    }

    /// Wait until `predicate` holds for the object, returning its last state
    async fn watch_or_poll(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        predicate: ObjectPredicate<'_>,
        opts: &PollOptions,
    ) -> Result<Option<DynamicObject>, WaitError> {
        poll_until(self, kind, namespace, name, predicate, opts).await
    }
}

/// Re-read the object every `opts.interval` until the predicate holds
pub async fn poll_until<C: ClusterClient + ?Sized>(
    client: &C,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    predicate: ObjectPredicate<'_>,
    opts: &PollOptions,
) -> Result<Option<DynamicObject>, WaitError> {
    let started = Instant::now();
    let deadline = started + opts.timeout;
    loop {
        if opts.cancel.is_cancelled() {
            return Err(WaitError::TimedOut {
                elapsed: started.elapsed(),
                cancelled: true,
            });
        }
        let current = client.get(kind, namespace, name).await?;
        if predicate(current.as_ref()) {
            return Ok(current);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WaitError::TimedOut {
                elapsed: started.elapsed(),
                cancelled: false,
            });
        }
        let pause = opts.interval.min(deadline - now);
        tokio::select! {
            _ = opts.cancel.cancelled() => {
                return Err(WaitError::TimedOut {
                    elapsed: started.elapsed(),
                    cancelled: true,
                });
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

/// Object name and namespace, which every applied object must carry
pub fn object_ref(obj: &DynamicObject) -> Result<(&str, &str), ClusterError> {
    let name = obj
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ClusterError::api(422, "Invalid", "object has no metadata.name"))?;
    let namespace = obj
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| ClusterError::api(422, "Invalid", "object has no metadata.namespace"))?;
    Ok((namespace, name))
}
