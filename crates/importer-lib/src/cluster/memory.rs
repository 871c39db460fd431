//! In-memory [`ClusterClient`] with simulated build and rollout controllers
//!
//! Applies follow last-write-wins semantics and keep server-owned fields
//! (status, uid, creation time). Created BuildRuns and applied workloads get
//! a status according to the configured [`BuildOutcome`] and
//! [`RolloutBehavior`]. Every mutating call is recorded in an ordered log.

use super::selector::LabelSelector;
use super::{object_ref, ClusterClient, Deletion, ResourceKind};
use crate::error::ClusterError;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

type Key = (ResourceKind, String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Apply,
    Create,
    Annotate,
    Delete,
    Get,
    List,
}

/// One mutating call, in the order the cluster processed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub verb: Verb,
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

/// What the simulated build controller does with a new BuildRun
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeed { digest: String },
    Fail { reason: String, message: String },
    /// Stays running forever
    Hang,
}

/// What the simulated workload controllers do after an apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutBehavior {
    Ready,
    /// Pods never become ready
    Stalled,
    Failed,
}

#[derive(Debug, Clone)]
struct Fault {
    verb: Verb,
    kind: Option<ResourceKind>,
    code: u16,
    remaining: u32,
}

pub struct MemoryCluster {
    objects: DashMap<Key, DynamicObject>,
    operations: Mutex<Vec<Operation>>,
    faults: Mutex<Vec<Fault>>,
    build_outcomes: Mutex<HashMap<String, BuildOutcome>>,
    default_build_outcome: Mutex<BuildOutcome>,
    rollout: Mutex<RolloutBehavior>,
    versions: AtomicU64,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn without_status(data: &Value) -> Value {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn condition(type_: &str, status: &str, reason: &str, message: &str) -> Value {
    json!({
        "type": type_,
        "status": status,
        "reason": reason,
        "message": message,
        "lastTransitionTime": Utc::now().to_rfc3339(),
    })
}

impl MemoryCluster {
    /// Builds succeed with a fixed digest and workloads become ready
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            operations: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            build_outcomes: Mutex::new(HashMap::new()),
            default_build_outcome: Mutex::new(BuildOutcome::Succeed {
                digest: "sha256:0000000000000000000000000000000000000000000000000000000000000001"
                    .to_string(),
            }),
            rollout: Mutex::new(RolloutBehavior::Ready),
            versions: AtomicU64::new(1),
        }
    }

    pub fn set_build_outcome(&self, outcome: BuildOutcome) {
        *lock(&self.default_build_outcome) = outcome;
    }

    /// Outcome for runs of one Build, overriding the default
    pub fn set_build_outcome_for(&self, build_name: &str, outcome: BuildOutcome) {
        lock(&self.build_outcomes).insert(build_name.to_string(), outcome);
    }

    pub fn set_rollout(&self, behavior: RolloutBehavior) {
        *lock(&self.rollout) = behavior;
    }

    /// Fail the next `times` calls of `verb` (optionally only for `kind`)
    pub fn fail_next(&self, verb: Verb, kind: Option<ResourceKind>, code: u16, times: u32) {
        lock(&self.faults).push(Fault {
            verb,
            kind,
            code,
            remaining: times,
        });
    }

    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.operations).clone()
    }

    /// Kinds touched by mutating calls, in order, without consecutive repeats
    pub fn mutation_order(&self) -> Vec<(Verb, ResourceKind)> {
        let mut order: Vec<(Verb, ResourceKind)> = Vec::new();
        for op in self.operations() {
            if order.last() != Some(&(op.verb, op.kind)) {
                order.push((op.verb, op.kind));
            }
        }
        order
    }

    pub fn object(&self, kind: ResourceKind, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .get(&(kind, namespace.to_string(), name.to_string()))
            .map(|o| o.value().clone())
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.objects.iter().filter(|e| e.key().0 == kind).count()
    }

    /// Store an object with its status, bypassing simulation and the log
    pub fn insert(&self, kind: ResourceKind, obj: DynamicObject) {
        let namespace = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();
        let status = obj.data.get("status").cloned();
        let mut obj = self.admit(obj);
        if let Some(status) = status {
            obj.data["status"] = status;
        }
        self.objects.insert((kind, namespace, name), obj);
    }

    /// Overwrite the status block of a stored object
    pub fn set_status(&self, kind: ResourceKind, namespace: &str, name: &str, status: Value) -> bool {
        match self
            .objects
            .get_mut(&(kind, namespace.to_string(), name.to_string()))
        {
            Some(mut obj) => {
                obj.data["status"] = status;
                true
            }
            None => false,
        }
    }

    fn next_version(&self) -> String {
        self.versions.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn record(&self, verb: Verb, kind: ResourceKind, namespace: &str, name: &str) {
        lock(&self.operations).push(Operation {
            verb,
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }

    fn check_fault(&self, verb: Verb, kind: ResourceKind) -> Result<(), ClusterError> {
        let mut faults = lock(&self.faults);
        let hit = faults
            .iter_mut()
            .find(|f| f.verb == verb && f.kind.map_or(true, |k| k == kind) && f.remaining > 0);
        match hit {
            Some(fault) => {
                fault.remaining -= 1;
                let code = fault.code;
                faults.retain(|f| f.remaining > 0);
                Err(ClusterError::api(
                    code,
                    "Injected",
                    format!("injected {:?} failure on {}", verb, kind),
                ))
            }
            None => Ok(()),
        }
    }

    /// Fill in server-owned metadata for a new object
    fn admit(&self, mut obj: DynamicObject) -> DynamicObject {
        let version = self.next_version();
        obj.metadata.uid = Some(format!("uid-{}", version));
        obj.metadata.resource_version = Some(version);
        obj.metadata.generation = Some(1);
        obj.metadata.creation_timestamp = Some(Time(Utc::now()));
        if let Some(map) = obj.data.as_object_mut() {
            map.remove("status");
        }
        obj
    }

    fn rollout_status(&self, kind: ResourceKind, obj: &DynamicObject) -> Option<Value> {
        let behavior = *lock(&self.rollout);
        let replicas = obj.data["spec"]["replicas"].as_i64().unwrap_or(1);
        let generation = obj.metadata.generation.unwrap_or(1);
        let status = match (kind, behavior) {
            (ResourceKind::Deployment, RolloutBehavior::Ready) => json!({
                "observedGeneration": generation,
                "replicas": replicas,
                "readyReplicas": replicas,
                "availableReplicas": replicas,
                "updatedReplicas": replicas,
                "conditions": [
                    condition("Available", "True", "MinimumReplicasAvailable", "Deployment has minimum availability."),
                    condition("Progressing", "True", "NewReplicaSetAvailable", "ReplicaSet has successfully progressed."),
                ],
            }),
            (ResourceKind::Deployment, RolloutBehavior::Stalled) => json!({
                "observedGeneration": generation,
                "replicas": replicas,
                "updatedReplicas": replicas,
                "unavailableReplicas": replicas,
                "conditions": [
                    condition("Available", "False", "MinimumReplicasUnavailable", "Deployment does not have minimum availability."),
                    condition("Progressing", "True", "ReplicaSetUpdated", "ReplicaSet is progressing."),
                ],
            }),
            (ResourceKind::Deployment, RolloutBehavior::Failed) => json!({
                "observedGeneration": generation,
                "replicas": replicas,
                "unavailableReplicas": replicas,
                "conditions": [
                    condition("Available", "False", "MinimumReplicasUnavailable", "Deployment does not have minimum availability."),
                    condition("Progressing", "False", "ProgressDeadlineExceeded", "ReplicaSet has timed out progressing."),
                ],
            }),
            (ResourceKind::StatefulSet, RolloutBehavior::Ready) => json!({
                "observedGeneration": generation,
                "replicas": replicas,
                "readyReplicas": replicas,
                "availableReplicas": replicas,
                "currentReplicas": replicas,
                "updatedReplicas": replicas,
            }),
            (ResourceKind::StatefulSet, _) => json!({
                "observedGeneration": generation,
                "replicas": replicas,
                "readyReplicas": 0,
                "currentReplicas": replicas,
                "updatedReplicas": replicas,
            }),
            (ResourceKind::Job, RolloutBehavior::Ready) => json!({
                "succeeded": 1,
                "conditions": [condition("Complete", "True", "Completed", "Job completed")],
            }),
            (ResourceKind::Job, RolloutBehavior::Stalled) => json!({ "active": 1 }),
            (ResourceKind::Job, RolloutBehavior::Failed) => json!({
                "failed": 4,
                "conditions": [condition("Failed", "True", "BackoffLimitExceeded", "Job has reached the specified backoff limit")],
            }),
            (ResourceKind::Service, _) => json!({ "loadBalancer": {} }),
            _ => return None,
        };
        Some(status)
    }

    fn build_run_status(&self, run: &DynamicObject) -> Value {
        let build_name = run.data["spec"]["build"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let outcome = lock(&self.build_outcomes)
            .get(&build_name)
            .cloned()
            .unwrap_or_else(|| lock(&self.default_build_outcome).clone());
        let now = Utc::now().to_rfc3339();

        match outcome {
            BuildOutcome::Succeed { digest } => json!({
                "conditions": [condition("Succeeded", "True", "Succeeded", "All Steps have completed executing")],
                "output": { "digest": digest },
                "startTime": now,
                "completionTime": now,
            }),
            BuildOutcome::Fail { reason, message } => json!({
                "conditions": [condition("Succeeded", "False", &reason, &message)],
                "failureDetails": { "reason": reason, "message": message },
                "startTime": now,
                "completionTime": now,
            }),
            BuildOutcome::Hang => json!({
                "conditions": [condition("Succeeded", "Unknown", "Running", "Not all Steps have completed executing")],
                "startTime": now,
            }),
        }
    }

    fn simulate(&self, kind: ResourceKind, obj: &mut DynamicObject) {
        let status = match kind {
            ResourceKind::BuildRun => Some(self.build_run_status(obj)),
            ResourceKind::Build => Some(json!({
                "registered": "True",
                "reason": "Succeeded",
                "message": "all validations succeeded",
            })),
            _ => self.rollout_status(kind, obj),
        };
        if let Some(status) = status {
            obj.data["status"] = status;
        }
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn apply(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        self.check_fault(Verb::Apply, kind)?;
        let (namespace, name) = object_ref(obj)?;
        self.record(Verb::Apply, kind, namespace, name);

        let key = (kind, namespace.to_string(), name.to_string());
        let stored = match self.objects.entry(key) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                let spec_changed = without_status(&current.data) != without_status(&obj.data);
                let meta_changed = current.metadata.labels != obj.metadata.labels
                    || current.metadata.annotations != obj.metadata.annotations;
                if spec_changed || meta_changed {
                    let status = current.data.get("status").cloned();
                    current.metadata.labels = obj.metadata.labels.clone();
                    current.metadata.annotations = obj.metadata.annotations.clone();
                    current.data = without_status(&obj.data);
                    if let Some(status) = status {
                        current.data["status"] = status;
                    }
                    current.metadata.resource_version = Some(self.next_version());
                    if spec_changed {
                        current.metadata.generation = current.metadata.generation.map(|g| g + 1);
                        if kind != ResourceKind::Build {
                            self.simulate(kind, current);
                        }
                    }
                }
                current.clone()
            }
            Entry::Vacant(entry) => {
                let mut created = self.admit(obj.clone());
                self.simulate(kind, &mut created);
                entry.insert(created.clone());
                created
            }
        };
        Ok(stored)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClusterError> {
        self.check_fault(Verb::Create, kind)?;
        let (namespace, name) = object_ref(obj)?;
        self.record(Verb::Create, kind, namespace, name);

        let key = (kind, namespace.to_string(), name.to_string());
        match self.objects.entry(key) {
            Entry::Occupied(_) => Err(ClusterError::conflict(format!(
                "{} {}/{}",
                kind, namespace, name
            ))),
            Entry::Vacant(entry) => {
                let mut created = self.admit(obj.clone());
                self.simulate(kind, &mut created);
                entry.insert(created.clone());
                Ok(created)
            }
        }
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        self.check_fault(Verb::Get, kind)?;
        Ok(self.object(kind, namespace, name))
    }

    async fn annotate(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        self.check_fault(Verb::Annotate, kind)?;
        self.record(Verb::Annotate, kind, namespace, name);
        let key = (kind, namespace.to_string(), name.to_string());
        let Some(mut obj) = self.objects.get_mut(&key) else {
            return Ok(None);
        };
        obj.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
        obj.metadata.resource_version = Some(self.next_version());
        Ok(Some(obj.clone()))
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Deletion, ClusterError> {
        self.check_fault(Verb::Delete, kind)?;
        self.record(Verb::Delete, kind, namespace, name);
        match self
            .objects
            .remove(&(kind, namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(Deletion::Deleted),
            None => Ok(Deletion::NotFound),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        self.check_fault(Verb::List, kind)?;
        let selector = LabelSelector::parse(label_selector)?;
        let empty = BTreeMap::new();
        let mut items: Vec<DynamicObject> = self
            .objects
            .iter()
            .filter(|e| e.key().0 == kind)
            .filter(|e| namespace.map_or(true, |ns| e.key().1 == ns))
            .filter(|e| selector.matches(e.value().metadata.labels.as_ref().unwrap_or(&empty)))
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| {
            (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name))
        });
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment(name: &str, image: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &ResourceKind::Deployment.api_resource()).within("team1");
        obj.metadata.labels = Some(BTreeMap::from([("app".to_string(), name.to_string())]));
        obj.data = json!({ "spec": { "replicas": 1, "template": { "spec": { "containers": [{ "image": image }] } } } });
        obj
    }

    #[tokio::test]
    async fn test_identical_apply_is_a_no_op() {
        let cluster = MemoryCluster::new();
        let first = cluster.apply(ResourceKind::Deployment, &deployment("a", "img:1")).await.unwrap();
        let second = cluster.apply(ResourceKind::Deployment, &deployment("a", "img:1")).await.unwrap();

        assert_eq!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert_eq!(serde_json::to_value(&first).unwrap(), serde_json::to_value(&second).unwrap());
    }

    #[tokio::test]
    async fn test_apply_replaces_spec_and_keeps_identity() {
        let cluster = MemoryCluster::new();
        let first = cluster.apply(ResourceKind::Deployment, &deployment("a", "img:1")).await.unwrap();
        let second = cluster.apply(ResourceKind::Deployment, &deployment("a", "img:2")).await.unwrap();

        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert_ne!(first.metadata.resource_version, second.metadata.resource_version);
        assert_eq!(second.metadata.generation, Some(2));
        assert_eq!(second.data["spec"]["template"]["spec"]["containers"][0]["image"], "img:2");
        assert_eq!(second.data["status"]["readyReplicas"], 1);
    }

    #[tokio::test]
    async fn test_create_conflicts_and_delete_is_idempotent() {
        let cluster = MemoryCluster::new();
        cluster.create(ResourceKind::Deployment, &deployment("a", "img")).await.unwrap();
        let err = cluster.create(ResourceKind::Deployment, &deployment("a", "img")).await.unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(cluster.delete(ResourceKind::Deployment, "team1", "a").await.unwrap(), Deletion::Deleted);
        assert_eq!(cluster.delete(ResourceKind::Deployment, "team1", "a").await.unwrap(), Deletion::NotFound);
    }

    #[tokio::test]
    async fn test_fault_injection_is_bounded() {
        let cluster = MemoryCluster::new();
        cluster.fail_next(Verb::Apply, Some(ResourceKind::Service), 503, 1);

        // other kinds are unaffected
        cluster.apply(ResourceKind::Deployment, &deployment("a", "img")).await.unwrap();

        let mut svc = deployment("a", "img");
        svc.types = Some(kube::core::TypeMeta { api_version: "v1".into(), kind: "Service".into() });
        let err = cluster.apply(ResourceKind::Service, &svc).await.unwrap_err();
        assert!(err.is_transient());
        assert!(cluster.apply(ResourceKind::Service, &svc).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_selector() {
        let cluster = MemoryCluster::new();
        cluster.apply(ResourceKind::Deployment, &deployment("a", "img")).await.unwrap();
        cluster.apply(ResourceKind::Deployment, &deployment("b", "img")).await.unwrap();
        let mut other = deployment("a", "img");
        other.metadata.namespace = Some("team2".to_string());
        cluster.apply(ResourceKind::Deployment, &other).await.unwrap();

        assert_eq!(cluster.list(ResourceKind::Deployment, Some("team1"), "").await.unwrap().len(), 2);
        assert_eq!(cluster.list(ResourceKind::Deployment, None, "app=a").await.unwrap().len(), 2);
        assert!(cluster.list(ResourceKind::Job, None, "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operation_log_preserves_order() {
        let cluster = MemoryCluster::new();
        cluster.apply(ResourceKind::Deployment, &deployment("a", "img")).await.unwrap();
        cluster.delete(ResourceKind::Service, "team1", "a").await.unwrap();

        assert_eq!(
            cluster.mutation_order(),
            vec![(Verb::Apply, ResourceKind::Deployment), (Verb::Delete, ResourceKind::Service)]
        );
    }
}
