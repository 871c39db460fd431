use super::Orchestrator;
use crate::cluster::{Deletion, PollOptions, ResourceKind, WaitError};
use crate::descriptor::manifests;
use crate::error::{ImportError, Result};
use crate::labels;
use crate::models::{DeleteOutcome, DeleteReport, DeleteStatus, ResourceDeletion, WorkloadKind};
use kube::api::DynamicObject;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

fn belongs_to(obj: &DynamicObject, kind: WorkloadKind) -> bool {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::TYPE))
        .map_or(false, |t| t == kind.as_str())
}

/// Whether a delete of this Build's workload has started
pub(super) fn marked_for_deletion(build: &DynamicObject) -> bool {
    build.metadata.deletion_timestamp.is_some()
        || build
            .metadata
            .annotations
            .as_ref()
            .map_or(false, |a| a.contains_key(labels::DELETING_ANNOTATION))
}

impl Orchestrator {
    /// Delete the Service, the workload, then the Build with its BuildRuns
    ///
    /// Absent resources are reported as `not_found`, not as errors. Resources
    /// labelled with a different kind are left alone. Returns once every
    /// deleted resource is confirmed gone.
    ///
    /// The Build is marked first so that finalization leaves it alone while
    /// the workload is torn down. A workload or Service that an in-flight
    /// finalization applied anyway is removed after the Build is gone.
    pub async fn delete(
        &self,
        namespace: &str,
        name: &str,
        kind: WorkloadKind,
    ) -> Result<DeleteReport> {
        self.mark_build(namespace, name, kind).await?;

        let mut targets = vec![(ResourceKind::Service, manifests::service_name(name, kind))];
        for workload in [ResourceKind::Deployment, ResourceKind::StatefulSet, ResourceKind::Job] {
            targets.push((workload, name.to_string()));
        }

        let mut resources = Vec::new();
        for (resource_kind, resource_name) in &targets {
            let outcome = self
                .delete_one(namespace, *resource_kind, resource_name, kind)
                .await?;
            resources.push(ResourceDeletion {
                kind: resource_kind.to_string(),
                name: resource_name.clone(),
                outcome,
            });
        }

        // BuildRun history goes before the Build it belongs to
        let runs = self
            .cluster
            .list(
                ResourceKind::BuildRun,
                Some(namespace),
                &labels::build_runs_selector(name),
            )
            .await?;
        for run in runs {
            let Some(run_name) = run.metadata.name.clone() else {
                continue;
            };
            let outcome = self
                .delete_one(namespace, ResourceKind::BuildRun, &run_name, kind)
                .await?;
            resources.push(ResourceDeletion {
                kind: ResourceKind::BuildRun.to_string(),
                name: run_name,
                outcome,
            });
        }
        let outcome = self
            .delete_one(namespace, ResourceKind::Build, name, kind)
            .await?;
        resources.push(ResourceDeletion {
            kind: ResourceKind::Build.to_string(),
            name: name.to_string(),
            outcome,
        });

        for (entry, (resource_kind, resource_name)) in resources.iter_mut().zip(&targets) {
            let again = self
                .delete_one(namespace, *resource_kind, resource_name, kind)
                .await?;
            if again == DeleteOutcome::Deleted {
                warn!(
                    resource = %resource_kind,
                    namespace = %namespace,
                    name = %resource_name,
                    "Removed resource recreated during delete"
                );
                entry.outcome = DeleteOutcome::Deleted;
            }
        }

        let deleted = resources
            .iter()
            .filter(|r| r.outcome == DeleteOutcome::Deleted)
            .count();
        let status = if deleted > 0 {
            DeleteStatus::Deleted
        } else {
            DeleteStatus::NotFound
        };

        self.metrics.inc_delete(match status {
            DeleteStatus::Deleted => "deleted",
            DeleteStatus::NotFound => "not_found",
        });
        if deleted > 0 {
            self.logger
                .log_workload_deleted(namespace, name, kind.as_str(), deleted);
        } else {
            info!(namespace = %namespace, name = %name, kind = %kind, "Nothing to delete");
        }
        Ok(DeleteReport { status, resources })
    }

    async fn mark_build(&self, namespace: &str, name: &str, kind: WorkloadKind) -> Result<()> {
        let Some(build) = self.cluster.get(ResourceKind::Build, namespace, name).await? else {
            return Ok(());
        };
        if !belongs_to(&build, kind) || marked_for_deletion(&build) {
            return Ok(());
        }
        let marker = BTreeMap::from([(labels::DELETING_ANNOTATION.to_string(), "true".to_string())]);
        self.cluster
            .annotate(ResourceKind::Build, namespace, name, &marker)
            .await?;
        debug!(namespace = %namespace, name = %name, "Marked Build for deletion");
        Ok(())
    }

    async fn delete_one(
        &self,
        namespace: &str,
        resource_kind: ResourceKind,
        name: &str,
        kind: WorkloadKind,
    ) -> Result<DeleteOutcome> {
        let Some(existing) = self.cluster.get(resource_kind, namespace, name).await? else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !belongs_to(&existing, kind) {
            debug!(
                resource = %resource_kind,
                namespace = %namespace,
                name = %name,
                "Leaving resource owned by another kind"
            );
            return Ok(DeleteOutcome::Skipped);
        }

        if self.cluster.delete(resource_kind, namespace, name).await? == Deletion::NotFound {
            return Ok(DeleteOutcome::NotFound);
        }

        let opts = PollOptions::new(self.config.poll_interval, self.config.delete_timeout);
        let gone = |obj: Option<&DynamicObject>| obj.is_none();
        match self
            .cluster
            .watch_or_poll(resource_kind, namespace, name, &gone, &opts)
            .await
        {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(WaitError::TimedOut { elapsed, cancelled }) => Err(ImportError::Timeout {
                what: format!("{} {}/{} to be deleted", resource_kind, namespace, name),
                elapsed,
                cancelled,
            }),
            Err(WaitError::Cluster(e)) => Err(e.into()),
        }
    }
}
