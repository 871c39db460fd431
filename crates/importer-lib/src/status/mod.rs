//! Workload status normalization
//!
//! Raw status of Deployments, StatefulSets and Jobs is parsed once at the
//! ingestion boundary into [`WorkloadStatus`], then reduced to a single
//! [`ReadyStatus`]. Both steps are pure and never fail: anything missing or
//! malformed becomes `Unknown`. Status fields are read in the API server's
//! camelCase form only.


use crate::labels;
use crate::models::{
    Condition, JobCounts, RecordMetadata, ReadyStatus, ReplicaStatus, ServicePort, ServiceRef,
    WorkloadRecord, WorkloadStatus, WorkloadType,
};
use k8s_openapi::api::apps::v1::{DeploymentStatus, StatefulSetStatus};
use k8s_openapi::api::batch::v1::JobStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use serde_json::Value;

/// Condition reasons that mean a rollout will not make progress on its own
const FAILURE_REASONS: &[&str] = &[
    "ProgressDeadlineExceeded",
    "FailedCreate",
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
];

/// Reason a Deployment reports once its newest ReplicaSet is fully rolled out
const ROLLOUT_COMPLETE_REASON: &str = "NewReplicaSetAvailable";

pub fn normalize(workload_type: WorkloadType, status: Option<&WorkloadStatus>) -> ReadyStatus {
    let Some(status) = status else {
        return ReadyStatus::Unknown;
    };
    match workload_type {
        WorkloadType::Job => normalize_job(status),
        WorkloadType::Deployment | WorkloadType::StatefulSet => {
            normalize_replicated(workload_type, status)
        }
    }
}

fn normalize_replicated(workload_type: WorkloadType, status: &WorkloadStatus) -> ReadyStatus {
    let Some(r) = status.replicas else {
        return ReadyStatus::Unknown;
    };
    if status.stale {
        return ReadyStatus::Progressing;
    }
    if r.desired < 0 || r.ready < 0 || r.available < 0 || r.updated.map_or(false, |u| u < 0) {
        return ReadyStatus::Unknown;
    }

    let progressing = status.conditions.iter().any(|c| {
        c.is("Progressing", "True") && c.reason.as_deref() != Some(ROLLOUT_COMPLETE_REASON)
    });
    let rolling = progressing
        || (workload_type == WorkloadType::StatefulSet
            && r.updated.map_or(false, |u| u < r.desired));

    if rolling && r.ready < r.desired {
        ReadyStatus::Progressing
    } else if r.desired > 0 && r.ready >= r.desired {
        ReadyStatus::Ready
    } else if r.ready == 0 && status.conditions.iter().any(signals_failure) {
        ReadyStatus::Failed
    } else {
        ReadyStatus::NotReady
    }
}

fn signals_failure(c: &Condition) -> bool {
    if c.is("ReplicaFailure", "True") {
        return true;
    }
    c.status == "False"
        && matches!(c.type_.as_str(), "Available" | "Progressing" | "Ready")
        && c
            .reason
            .as_deref()
            .map_or(false, |r| FAILURE_REASONS.contains(&r))
}

/// Terminal conditions win over pod counts, so a stale `active` count can
/// never turn a finished Job back into `Running`
fn normalize_job(status: &WorkloadStatus) -> ReadyStatus {
    if status.conditions.iter().any(|c| c.is("Complete", "True")) {
        return ReadyStatus::Completed;
    }
    if status.conditions.iter().any(|c| c.is("Failed", "True")) {
        return ReadyStatus::Failed;
    }
    let Some(job) = status.job else {
        return ReadyStatus::Unknown;
    };
    if job.active < 0 || job.succeeded < 0 || job.failed < 0 {
        ReadyStatus::Unknown
    } else if job.active > 0 {
        ReadyStatus::Running
    } else {
        ReadyStatus::Pending
    }
}

fn time(t: Option<Time>) -> Option<chrono::DateTime<chrono::Utc>> {
    t.map(|t| t.0)
}

macro_rules! conditions {
    ($list:expr) => {
        $list
            .unwrap_or_default()
            .into_iter()
            .map(|c| Condition {
                type_: c.type_,
                status: c.status,
                reason: c.reason,
                message: c.message,
                last_transition_time: time(c.last_transition_time),
            })
            .collect::<Vec<_>>()
    };
}

/// Parse the `status` block of a workload object; `None` if absent or invalid
pub fn parse_status(workload_type: WorkloadType, data: &Value) -> Option<WorkloadStatus> {
    let raw = data.get("status").filter(|s| s.is_object())?.clone();
    let desired = match data.pointer("/spec/replicas") {
        None | Some(Value::Null) => 1,
        Some(v) => i32::try_from(v.as_i64()?).ok()?,
    };

    match workload_type {
        WorkloadType::Deployment => {
            let s: DeploymentStatus = serde_json::from_value(raw).ok()?;
            Some(WorkloadStatus {
                replicas: Some(ReplicaStatus {
                    desired,
                    ready: s.ready_replicas.unwrap_or(0),
                    available: s.available_replicas.unwrap_or(0),
                    updated: None,
                }),
                job: None,
                conditions: conditions!(s.conditions),
                stale: false,
            })
        }
        WorkloadType::StatefulSet => {
            let s: StatefulSetStatus = serde_json::from_value(raw).ok()?;
            Some(WorkloadStatus {
                replicas: Some(ReplicaStatus {
                    desired,
                    ready: s.ready_replicas.unwrap_or(0),
                    available: s.available_replicas.unwrap_or(0),
                    updated: Some(s.updated_replicas.unwrap_or(0)),
                }),
                job: None,
                conditions: conditions!(s.conditions),
                stale: false,
            })
        }
        WorkloadType::Job => {
            let s: JobStatus = serde_json::from_value(raw).ok()?;
            Some(WorkloadStatus {
                replicas: None,
                job: Some(JobCounts {
                    active: s.active.unwrap_or(0),
                    succeeded: s.succeeded.unwrap_or(0),
                    failed: s.failed.unwrap_or(0),
                }),
                conditions: conditions!(s.conditions),
                stale: false,
            })
        }
    }
}

/// Parse the status of a whole object
///
/// A Deployment or StatefulSet whose `observedGeneration` is behind
/// `metadata.generation` still reports the previous spec and is marked stale.
pub fn parse_object_status(workload_type: WorkloadType, obj: &DynamicObject) -> Option<WorkloadStatus> {
    let mut status = parse_status(workload_type, &obj.data)?;
    if workload_type != WorkloadType::Job {
        let observed = obj.data.pointer("/status/observedGeneration").and_then(Value::as_i64);
        status.stale = matches!(
            (observed, obj.metadata.generation),
            (Some(observed), Some(generation)) if observed < generation
        );
    }
    Some(status)
}

pub fn record_metadata(obj: &DynamicObject) -> RecordMetadata {
    let meta = &obj.metadata;
    RecordMetadata {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone().unwrap_or_default(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        creation_time: time(meta.creation_timestamp.clone()),
        uid: meta.uid.clone(),
    }
}

pub fn service_ref(obj: &DynamicObject) -> ServiceRef {
    let spec = &obj.data["spec"];
    let ports = spec["ports"]
        .as_array()
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| {
                    let port = i32::try_from(p["port"].as_i64()?).ok()?;
                    Some(ServicePort {
                        name: p["name"].as_str().unwrap_or("http").to_string(),
                        port,
                        target_port: p["targetPort"]
                            .as_i64()
                            .and_then(|t| i32::try_from(t).ok())
                            .unwrap_or(port),
                        protocol: p["protocol"].as_str().unwrap_or("TCP").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ServiceRef {
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        cluster_ip: spec["clusterIP"].as_str().map(str::to_string),
        ports,
    }
}

/// Canonical record of a workload object and its Service
pub fn workload_record(
    workload_type: WorkloadType,
    obj: &DynamicObject,
    service: Option<&DynamicObject>,
) -> WorkloadRecord {
    WorkloadRecord {
        metadata: record_metadata(obj),
        workload_type,
        status: parse_object_status(workload_type, obj),
        service_ref: service.map(service_ref),
    }
}

/// Workload type recorded on an object, falling back to its API kind
pub fn workload_type_of(obj: &DynamicObject) -> Option<WorkloadType> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::WORKLOAD_TYPE))
        .and_then(|t| WorkloadType::parse(t))
        .or_else(|| match obj.types.as_ref().map(|t| t.kind.as_str()) {
            Some("Deployment") => Some(WorkloadType::Deployment),
            Some("StatefulSet") => Some(WorkloadType::StatefulSet),
            Some("Job") => Some(WorkloadType::Job),
            _ => None,
        })
}

pub fn ready_status(record: &WorkloadRecord) -> ReadyStatus {
    normalize(record.workload_type, record.status.as_ref())
}
