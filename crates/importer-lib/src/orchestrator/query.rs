use super::Orchestrator;
use crate::cluster::ResourceKind;
use crate::descriptor::manifests;
use crate::error::{ImportError, Result};
use crate::labels;
use crate::models::{ReadyStatus, StatusReport, WorkloadKind, WorkloadSummary, WorkloadType};
use crate::status::{ready_status, workload_record};
use kube::api::DynamicObject;

const LOOKUP_ORDER: [WorkloadType; 3] = [
    WorkloadType::Deployment,
    WorkloadType::StatefulSet,
    WorkloadType::Job,
];

fn kind_label(obj: &DynamicObject) -> Option<WorkloadKind> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::TYPE))
        .and_then(|k| WorkloadKind::parse(k))
}

impl Orchestrator {
    /// First workload named `name`, looked up as Deployment, StatefulSet, Job
    pub(super) async fn find_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<(WorkloadType, DynamicObject)>> {
        for workload_type in LOOKUP_ORDER {
            let kind = ResourceKind::for_workload(workload_type);
            if let Some(obj) = self.cluster.get(kind, namespace, name).await? {
                return Ok(Some((workload_type, obj)));
            }
        }
        Ok(None)
    }

    /// Current readiness of a workload
    ///
    /// Read-only and cheap, meant to be polled. A source import whose
    /// workload is not deployed yet reports `Unknown` together with its
    /// build status.
    pub async fn status(&self, namespace: &str, name: &str) -> Result<StatusReport> {
        let Some((workload_type, obj)) = self.find_workload(namespace, name).await? else {
            let build = self.builds.latest(namespace, name).await?;
            return match build {
                Some(job) => Ok(StatusReport {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    ready_status: ReadyStatus::Unknown,
                    kind: None,
                    workload_type: None,
                    replica_status: None,
                    conditions: Vec::new(),
                    service_endpoint: None,
                    build_status: Some(job),
                }),
                None => Err(ImportError::not_found("workload", namespace, name)),
            };
        };

        let kind = kind_label(&obj);
        let service = match kind {
            Some(kind) if workload_type.has_service() => {
                self.cluster
                    .get(
                        ResourceKind::Service,
                        namespace,
                        &manifests::service_name(name, kind),
                    )
                    .await?
            }
            _ => None,
        };
        let record = workload_record(workload_type, &obj, service.as_ref());

        let build_name = record
            .metadata
            .annotations
            .get(labels::BUILD_ANNOTATION)
            .cloned();
        let build_status = match build_name {
            Some(build_name) => self.builds.latest(namespace, &build_name).await?,
            None => None,
        };

        let ready = ready_status(&record);
        let status = record.status.unwrap_or_default();
        Ok(StatusReport {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ready_status: ready,
            kind,
            workload_type: Some(workload_type),
            replica_status: status.replicas,
            conditions: status.conditions,
            service_endpoint: record.service_ref.as_ref().and_then(|s| s.endpoint()),
            build_status,
        })
    }

    /// Workloads created by this importer, optionally narrowed to one kind
    ///
    /// `namespace = None` lists across all namespaces.
    pub async fn list(
        &self,
        namespace: Option<&str>,
        kind: Option<WorkloadKind>,
    ) -> Result<Vec<WorkloadSummary>> {
        let managed_by = &self.config.descriptors.managed_by;
        let selector = match kind {
            Some(kind) => labels::kind_selector(kind, managed_by),
            None => format!("{}={}", labels::MANAGED_BY, managed_by),
        };

        let mut summaries = Vec::new();
        for workload_type in LOOKUP_ORDER {
            let kind = ResourceKind::for_workload(workload_type);
            for obj in self.cluster.list(kind, namespace, &selector).await? {
                let record = workload_record(workload_type, &obj, None);
                let ready = ready_status(&record);
                let meta = record.metadata;
                summaries.push(WorkloadSummary {
                    kind: kind_label(&obj),
                    workload_type,
                    ready_status: ready,
                    protocols: labels::protocols_of(&meta.labels),
                    framework: meta.labels.get(labels::FRAMEWORK).cloned(),
                    description: meta.annotations.get(labels::DESCRIPTION_ANNOTATION).cloned(),
                    created_at: meta.creation_time,
                    name: meta.name,
                    namespace: meta.namespace,
                });
            }
        }
        summaries.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        Ok(summaries)
    }
}
