//! Orchestrator tests against the in-memory cluster
//!
//! These tests verify:
//! - Source and image imports, interactive and blocking
//! - Build-before-deploy and failure propagation
//! - Delete completeness and kind scoping
//! - Status queries, listing and the build reconciler

use super::*;
use crate::cluster::memory::{BuildOutcome, RolloutBehavior, Verb};
use crate::cluster::{MemoryCluster, ResourceKind};
use crate::error::ImportError;
use crate::labels;
use crate::models::{
    BuildPhase, DeleteOutcome, DeleteStatus, ImportRequest, ImportStatus, ReadyStatus,
    ServicePort, WorkloadKind, WorkloadType,
};
use kube::api::DynamicObject;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Helper to create an orchestrator over a fresh in-memory cluster
fn setup() -> (Arc<MemoryCluster>, Orchestrator) {
    let cluster = Arc::new(MemoryCluster::new());
    let orchestrator = Orchestrator::new(cluster.clone(), OrchestratorConfig::default());
    (cluster, orchestrator)
}

fn weather_tool() -> ImportRequest {
    let mut req = ImportRequest::from_source(
        "weather-tool",
        "team1",
        WorkloadKind::Tool,
        "https://github.com/kagenti/agent-examples",
        "mcp/weather_tool",
    );
    req.service_ports = vec![ServicePort::http(8000, 8000)];
    req
}

fn echo_agent(image: &str) -> ImportRequest {
    ImportRequest::from_image("echo-agent", "team1", WorkloadKind::Agent, image)
}

fn wait() -> Duration {
    Duration::from_secs(600)
}

fn service_ports(obj: &DynamicObject) -> Value {
    obj.data["spec"]["ports"].clone()
}

mod source_import_tests {
    use super::*;

    #[tokio::test]
    async fn test_weather_tool_end_to_end() {
        let (cluster, orchestrator) = setup();

        let report = orchestrator
            .import_and_wait(weather_tool(), wait(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.ready_status, ReadyStatus::Ready);
        assert_eq!(report.kind, Some(WorkloadKind::Tool));
        assert_eq!(
            report.service_endpoint.as_deref(),
            Some("http://weather-tool-mcp.team1.svc.cluster.local:8000")
        );

        let build = report.build_status.unwrap();
        assert_eq!(build.phase, BuildPhase::Succeeded);
        assert!(build.build_run_name.starts_with("weather-tool-run-"));
        assert!(build.output_image.as_deref().unwrap().ends_with("/weather-tool:v0.0.1"));

        assert!(cluster.object(ResourceKind::Build, "team1", "weather-tool").is_some());
        let deployment = cluster
            .object(ResourceKind::Deployment, "team1", "weather-tool")
            .unwrap();
        let image = deployment.data["spec"]["template"]["spec"]["containers"][0]["image"]
            .as_str()
            .unwrap();
        assert!(image.starts_with(
            "registry.cr-system.svc.cluster.local:5000/weather-tool:v0.0.1@sha256:"
        ));
        assert!(cluster
            .object(ResourceKind::Service, "team1", "weather-tool-mcp")
            .is_some());
    }

    #[tokio::test]
    async fn test_resources_are_created_in_contract_order() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import_and_wait(weather_tool(), wait(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            cluster.mutation_order(),
            vec![
                (Verb::Apply, ResourceKind::Build),
                (Verb::Create, ResourceKind::BuildRun),
                (Verb::Apply, ResourceKind::Deployment),
                (Verb::Apply, ResourceKind::Service),
            ]
        );
    }

    #[tokio::test]
    async fn test_build_failure_blocks_deployment() {
        let (cluster, orchestrator) = setup();
        cluster.set_build_outcome(BuildOutcome::Fail {
            reason: "BuildFailed".to_string(),
            message: "step-build-and-push exited with code 1".to_string(),
        });

        let err = orchestrator
            .import_and_wait(weather_tool(), wait(), CancellationToken::new())
            .await
            .unwrap_err();

        match &err {
            ImportError::BuildFailure { reason, message, .. } => {
                assert_eq!(reason, "BuildFailed");
                assert_eq!(message, "step-build-and-push exited with code 1");
            }
            other => panic!("expected build failure, got {:?}", other),
        }
        assert!(!err.is_retry_safe());
        assert_eq!(cluster.count(ResourceKind::Deployment), 0);
        assert_eq!(cluster.count(ResourceKind::Service), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_build_times_out_without_deploying() {
        let (cluster, orchestrator) = setup();
        cluster.set_build_outcome(BuildOutcome::Hang);

        let err = orchestrator
            .import_and_wait(weather_tool(), Duration::from_secs(60), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Timeout { cancelled: false, .. }));
        assert!(err.is_retry_safe());
        assert_eq!(cluster.count(ResourceKind::Deployment), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_is_distinguishable() {
        let (cluster, orchestrator) = setup();
        cluster.set_build_outcome(BuildOutcome::Hang);
        let cancel = CancellationToken::new();

        let waiter = {
            let orchestrator = orchestrator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { orchestrator.import_and_wait(weather_tool(), wait(), cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(20)).await;
        cancel.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ImportError::Timeout { cancelled: true, .. }));
    }

    #[tokio::test]
    async fn test_interactive_import_returns_build_run_then_finishes() {
        let (cluster, orchestrator) = setup();

        let response = orchestrator.import(weather_tool()).await.unwrap();
        assert_eq!(response.status, ImportStatus::Accepted);
        let run = response.build_run_name.unwrap();
        assert_eq!(cluster.count(ResourceKind::Deployment), 0);

        let finalized = orchestrator
            .finish_build("team1", "weather-tool", &run, CancellationToken::new())
            .await
            .unwrap();
        assert!(finalized.deployed);
        assert_eq!(finalized.build_run_name, run);
        assert!(cluster
            .object(ResourceKind::Deployment, "team1", "weather-tool")
            .is_some());
    }

    #[tokio::test]
    async fn test_status_before_deploy_reports_build() {
        let (_cluster, orchestrator) = setup();
        orchestrator.import(weather_tool()).await.unwrap();

        let report = orchestrator.status("team1", "weather-tool").await.unwrap();
        assert_eq!(report.ready_status, ReadyStatus::Unknown);
        assert!(report.workload_type.is_none());
        assert_eq!(report.build_status.unwrap().phase, BuildPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_finalize_requires_a_successful_build() {
        let (cluster, orchestrator) = setup();
        assert!(matches!(
            orchestrator.finalize("team1", "weather-tool").await,
            Err(ImportError::NotFound { .. })
        ));

        cluster.set_build_outcome(BuildOutcome::Fail {
            reason: "GitRemotePrivate".to_string(),
            message: "authentication required".to_string(),
        });
        orchestrator.import(weather_tool()).await.unwrap();

        let err = orchestrator.finalize("team1", "weather-tool").await.unwrap_err();
        assert!(matches!(err, ImportError::BuildFailure { ref reason, .. } if reason == "GitRemotePrivate"));
        assert_eq!(cluster.count(ResourceKind::Deployment), 0);
    }

    #[tokio::test]
    async fn test_finalize_leaves_running_build_alone() {
        let (cluster, orchestrator) = setup();
        cluster.set_build_outcome(BuildOutcome::Hang);
        orchestrator.import(weather_tool()).await.unwrap();

        let report = orchestrator.finalize("team1", "weather-tool").await.unwrap();
        assert!(!report.deployed);
        assert_eq!(report.build_phase, BuildPhase::Running);
        assert_eq!(cluster.count(ResourceKind::Deployment), 0);
    }

    #[tokio::test]
    async fn test_rebuild_creates_a_new_run() {
        let (cluster, orchestrator) = setup();
        let first = orchestrator.import(weather_tool()).await.unwrap();
        let second = orchestrator.import(weather_tool()).await.unwrap();

        assert_ne!(first.build_run_name, second.build_run_name);
        assert_eq!(cluster.count(ResourceKind::Build), 1);
        assert_eq!(cluster.count(ResourceKind::BuildRun), 2);
    }
}

mod image_import_tests {
    use super::*;

    #[tokio::test]
    async fn test_image_import_is_idempotent() {
        let (cluster, orchestrator) = setup();
        let req = echo_agent("ghcr.io/kagenti/echo:1.0");

        orchestrator.import(req.clone()).await.unwrap();
        let first = cluster
            .object(ResourceKind::Deployment, "team1", "echo-agent")
            .unwrap();
        let first_record = orchestrator.status("team1", "echo-agent").await.unwrap();

        orchestrator.import(req).await.unwrap();
        let second = cluster
            .object(ResourceKind::Deployment, "team1", "echo-agent")
            .unwrap();
        let second_record = orchestrator.status("team1", "echo-agent").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first_record, second_record);
        assert_eq!(cluster.count(ResourceKind::Service), 1);
    }

    #[tokio::test]
    async fn test_reimport_updates_in_place() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap();
        orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:2.0"))
            .await
            .unwrap();

        let deployment = cluster
            .object(ResourceKind::Deployment, "team1", "echo-agent")
            .unwrap();
        assert_eq!(
            deployment.data["spec"]["template"]["spec"]["containers"][0]["image"],
            "ghcr.io/kagenti/echo:2.0"
        );
        assert_eq!(deployment.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_validation_errors_do_not_touch_the_cluster() {
        let (cluster, orchestrator) = setup();
        let mut req = echo_agent("ghcr.io/kagenti/echo:1.0");
        req.name = "Echo_Agent".to_string();

        let err = orchestrator.import(req).await.unwrap_err();
        assert!(matches!(err, ImportError::Validation(ref v) if v.has_field("name")));
        assert!(cluster.operations().is_empty());
    }

    #[tokio::test]
    async fn test_name_collision_with_other_kind_is_rejected() {
        let (cluster, orchestrator) = setup();
        let mut agent = ImportRequest::from_image("weather", "team1", WorkloadKind::Agent, "ghcr.io/a/weather:1");
        agent.service_ports = vec![ServicePort::http(8080, 8000)];
        orchestrator.import(agent).await.unwrap();
        let before = cluster.operations().len();

        let tool = ImportRequest::from_image("weather", "team1", WorkloadKind::Tool, "ghcr.io/t/weather:1");
        let err = orchestrator.import(tool).await.unwrap_err();

        assert!(matches!(err, ImportError::Validation(ref v) if v.has_field("name")));
        assert_eq!(cluster.operations().len(), before);
        let deployment = cluster.object(ResourceKind::Deployment, "team1", "weather").unwrap();
        assert_eq!(deployment.metadata.labels.unwrap()[labels::TYPE], "agent");
    }

    #[tokio::test]
    async fn test_image_import_over_source_build_is_rejected() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import_and_wait(weather_tool(), wait(), CancellationToken::new())
            .await
            .unwrap();
        let before = cluster.operations().len();

        let image = ImportRequest::from_image(
            "weather-tool",
            "team1",
            WorkloadKind::Tool,
            "ghcr.io/kagenti/weather-tool:2.0",
        );
        let err = orchestrator.import(image).await.unwrap_err();

        assert!(matches!(err, ImportError::Validation(ref v) if v.has_field("deploymentMethod")));
        assert_eq!(cluster.operations().len(), before);
    }

    #[tokio::test]
    async fn test_unmanaged_resource_is_not_overwritten() {
        let (cluster, orchestrator) = setup();
        let foreign = DynamicObject::new("echo-agent", &ResourceKind::Deployment.api_resource())
            .within("team1");
        cluster.insert(ResourceKind::Deployment, foreign);

        let err = orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
    }

    #[tokio::test]
    async fn test_changing_workload_type_requires_delete() {
        let (_cluster, orchestrator) = setup();
        orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap();

        let mut req = echo_agent("ghcr.io/kagenti/echo:1.0");
        req.workload_type = WorkloadType::StatefulSet;
        let err = orchestrator.import(req).await.unwrap_err();
        assert!(matches!(err, ImportError::Validation(ref v) if v.has_field("workloadType")));
    }

    #[tokio::test]
    async fn test_apply_failure_keeps_earlier_resources() {
        let (cluster, orchestrator) = setup();
        cluster.fail_next(Verb::Apply, Some(ResourceKind::Service), 422, 1);

        let err = orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap_err();

        match &err {
            ImportError::Apply { kind, attempts, .. } => {
                assert_eq!(kind, "Service");
                assert_eq!(*attempts, 1);
            }
            other => panic!("expected apply error, got {:?}", other),
        }
        assert!(err.is_retry_safe());
        assert!(cluster.object(ResourceKind::Deployment, "team1", "echo-agent").is_some());

        // retrying converges
        orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap();
        assert!(cluster.object(ResourceKind::Service, "team1", "echo-agent").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_apply_errors_are_retried() {
        let (cluster, orchestrator) = setup();
        cluster.fail_next(Verb::Apply, Some(ResourceKind::Deployment), 503, 2);

        orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap();
        assert!(cluster.object(ResourceKind::Deployment, "team1", "echo-agent").is_some());
    }

    #[tokio::test]
    async fn test_failed_rollout_is_reported_not_raised() {
        let (cluster, orchestrator) = setup();
        cluster.set_rollout(RolloutBehavior::Failed);

        let report = orchestrator
            .import_and_wait(
                echo_agent("ghcr.io/kagenti/missing:1.0"),
                wait(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.ready_status, ReadyStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_rollout_times_out() {
        let (cluster, orchestrator) = setup();
        cluster.set_rollout(RolloutBehavior::Stalled);

        let err = orchestrator
            .import_and_wait(
                echo_agent("ghcr.io/kagenti/echo:1.0"),
                Duration::from_secs(120),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Timeout { .. }));
        assert_eq!(
            orchestrator.status("team1", "echo-agent").await.unwrap().ready_status,
            ReadyStatus::Progressing
        );
    }

    #[tokio::test]
    async fn test_job_import_completes_without_service() {
        let (cluster, orchestrator) = setup();
        let mut req = echo_agent("ghcr.io/kagenti/batch:1.0");
        req.workload_type = WorkloadType::Job;

        let report = orchestrator
            .import_and_wait(req, wait(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.ready_status, ReadyStatus::Completed);
        assert!(report.service_endpoint.is_none());
        assert_eq!(cluster.count(ResourceKind::Service), 0);
    }

    #[tokio::test]
    async fn test_concurrent_imports_last_write_wins() {
        let (cluster, orchestrator) = setup();
        let mut first = echo_agent("ghcr.io/kagenti/echo:1.0");
        first.service_ports = vec![ServicePort::http(8080, 8000)];
        let mut second = echo_agent("ghcr.io/kagenti/echo:1.0");
        second.service_ports = vec![
            ServicePort::http(9090, 9000),
            ServicePort {
                name: "metrics".to_string(),
                port: 9100,
                target_port: 9100,
                protocol: "TCP".to_string(),
            },
        ];

        let (a, b) = tokio::join!(orchestrator.import(first), orchestrator.import(second));
        a.unwrap();
        b.unwrap();

        let ports = service_ports(&cluster.object(ResourceKind::Service, "team1", "echo-agent").unwrap());
        let expected_first = json!([{ "name": "http", "port": 8080, "targetPort": 8000, "protocol": "TCP" }]);
        let expected_second = json!([
            { "name": "http", "port": 9090, "targetPort": 9000, "protocol": "TCP" },
            { "name": "metrics", "port": 9100, "targetPort": 9100, "protocol": "TCP" },
        ]);
        assert!(ports == expected_first || ports == expected_second, "merged ports: {}", ports);
    }
}

mod delete_tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_of_nothing_reports_not_found() {
        let (_cluster, orchestrator) = setup();

        let report = orchestrator
            .delete("team1", "ghost", WorkloadKind::Agent)
            .await
            .unwrap();
        assert_eq!(report.status, DeleteStatus::NotFound);
        assert!(!report.resources.is_empty());
        assert!(report
            .resources
            .iter()
            .all(|r| r.outcome == DeleteOutcome::NotFound));
    }

    #[tokio::test]
    async fn test_delete_removes_everything_in_order() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import_and_wait(weather_tool(), wait(), CancellationToken::new())
            .await
            .unwrap();
        orchestrator.builds().trigger_existing("team1", "weather-tool").await.unwrap();

        let before = cluster.operations().len();
        let report = orchestrator
            .delete("team1", "weather-tool", WorkloadKind::Tool)
            .await
            .unwrap();
        assert_eq!(report.status, DeleteStatus::Deleted);

        for (kind, name) in [
            (ResourceKind::Service, "weather-tool-mcp"),
            (ResourceKind::Deployment, "weather-tool"),
            (ResourceKind::Build, "weather-tool"),
        ] {
            assert!(cluster.object(kind, "team1", name).is_none(), "{} left behind", kind);
        }
        assert_eq!(cluster.count(ResourceKind::BuildRun), 0);

        let deletions: Vec<ResourceKind> = cluster.operations()[before..]
            .iter()
            .filter(|op| op.verb == Verb::Delete)
            .map(|op| op.kind)
            .collect();
        assert_eq!(
            deletions,
            vec![
                ResourceKind::Service,
                ResourceKind::Deployment,
                ResourceKind::BuildRun,
                ResourceKind::BuildRun,
                ResourceKind::Build,
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_twice_is_safe() {
        let (_cluster, orchestrator) = setup();
        orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap();

        let first = orchestrator
            .delete("team1", "echo-agent", WorkloadKind::Agent)
            .await
            .unwrap();
        let second = orchestrator
            .delete("team1", "echo-agent", WorkloadKind::Agent)
            .await
            .unwrap();
        assert_eq!(first.status, DeleteStatus::Deleted);
        assert_eq!(second.status, DeleteStatus::NotFound);
        assert!(matches!(
            orchestrator.status("team1", "echo-agent").await,
            Err(ImportError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_leaves_other_kinds_alone() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap();

        let report = orchestrator
            .delete("team1", "echo-agent", WorkloadKind::Tool)
            .await
            .unwrap();
        assert_eq!(report.status, DeleteStatus::NotFound);
        assert!(report
            .resources
            .iter()
            .any(|r| r.kind == "Deployment" && r.outcome == DeleteOutcome::Skipped));
        assert!(cluster.object(ResourceKind::Deployment, "team1", "echo-agent").is_some());
    }
}

mod delete_race_tests {
    use super::*;
    use crate::cluster::{ClusterClient, Deletion};
    use crate::error::ClusterError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn assert_nothing_left(cluster: &MemoryCluster) {
        for (kind, name) in [
            (ResourceKind::Service, "weather-tool-mcp"),
            (ResourceKind::Deployment, "weather-tool"),
            (ResourceKind::Build, "weather-tool"),
        ] {
            assert!(cluster.object(kind, "team1", name).is_none(), "{} left behind", kind);
        }
        assert_eq!(cluster.count(ResourceKind::BuildRun), 0);
    }

    #[tokio::test]
    async fn test_reconcile_during_interrupted_delete_does_not_redeploy() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import_and_wait(weather_tool(), wait(), CancellationToken::new())
            .await
            .unwrap();

        // delete stops after the Service and Deployment are gone
        cluster.fail_next(Verb::Delete, Some(ResourceKind::BuildRun), 500, 1);
        assert!(orchestrator
            .delete("team1", "weather-tool", WorkloadKind::Tool)
            .await
            .is_err());
        assert!(cluster
            .object(ResourceKind::Deployment, "team1", "weather-tool")
            .is_none());
        let build = cluster
            .object(ResourceKind::Build, "team1", "weather-tool")
            .unwrap();
        assert!(build.metadata.annotations.unwrap().contains_key(labels::DELETING_ANNOTATION));

        let reconciler = BuildReconciler::new(orchestrator.clone(), ReconcilerConfig::default());
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!((summary.finalized, summary.failed), (0, 0));
        let finalized = orchestrator.finalize("team1", "weather-tool").await.unwrap();
        assert!(!finalized.deployed);
        assert!(cluster
            .object(ResourceKind::Deployment, "team1", "weather-tool")
            .is_none());
        assert!(cluster
            .object(ResourceKind::Service, "team1", "weather-tool-mcp")
            .is_none());

        let report = orchestrator
            .delete("team1", "weather-tool", WorkloadKind::Tool)
            .await
            .unwrap();
        assert_eq!(report.status, DeleteStatus::Deleted);
        assert_nothing_left(&cluster);
    }

    #[tokio::test]
    async fn test_import_of_name_being_deleted_is_rejected() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import_and_wait(weather_tool(), wait(), CancellationToken::new())
            .await
            .unwrap();
        cluster.fail_next(Verb::Delete, Some(ResourceKind::Build), 500, 1);
        assert!(orchestrator
            .delete("team1", "weather-tool", WorkloadKind::Tool)
            .await
            .is_err());

        let err = orchestrator.import(weather_tool()).await.unwrap_err();
        assert!(matches!(err, ImportError::Validation(ref v) if v.has_field("name")));
    }

    /// Replays a finalization that read the Build before it was marked and
    /// applies its workload while the BuildRuns are being removed
    struct LateFinalize {
        inner: Arc<MemoryCluster>,
        pending: Mutex<Vec<(ResourceKind, DynamicObject)>>,
    }

    #[async_trait]
    impl ClusterClient for LateFinalize {
        async fn apply(
            &self,
            kind: ResourceKind,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, ClusterError> {
            self.inner.apply(kind, obj).await
        }

        async fn create(
            &self,
            kind: ResourceKind,
            obj: &DynamicObject,
        ) -> Result<DynamicObject, ClusterError> {
            self.inner.create(kind, obj).await
        }

        async fn get(
            &self,
            kind: ResourceKind,
            namespace: &str,
            name: &str,
        ) -> Result<Option<DynamicObject>, ClusterError> {
            self.inner.get(kind, namespace, name).await
        }

        async fn annotate(
            &self,
            kind: ResourceKind,
            namespace: &str,
            name: &str,
            annotations: &BTreeMap<String, String>,
        ) -> Result<Option<DynamicObject>, ClusterError> {
            self.inner.annotate(kind, namespace, name, annotations).await
        }

        async fn delete(
            &self,
            kind: ResourceKind,
            namespace: &str,
            name: &str,
        ) -> Result<Deletion, ClusterError> {
            let deletion = self.inner.delete(kind, namespace, name).await?;
            if kind == ResourceKind::BuildRun {
                let late: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
                for (kind, obj) in late {
                    self.inner.apply(kind, &obj).await?;
                }
            }
            Ok(deletion)
        }

        async fn list(
            &self,
            kind: ResourceKind,
            namespace: Option<&str>,
            label_selector: &str,
        ) -> Result<Vec<DynamicObject>, ClusterError> {
            self.inner.list(kind, namespace, label_selector).await
        }
    }

    #[tokio::test]
    async fn test_workload_applied_mid_delete_is_removed() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import_and_wait(weather_tool(), wait(), CancellationToken::new())
            .await
            .unwrap();
        let late = LateFinalize {
            inner: cluster.clone(),
            pending: Mutex::new(vec![
                (
                    ResourceKind::Deployment,
                    cluster.object(ResourceKind::Deployment, "team1", "weather-tool").unwrap(),
                ),
                (
                    ResourceKind::Service,
                    cluster.object(ResourceKind::Service, "team1", "weather-tool-mcp").unwrap(),
                ),
            ]),
        };
        let racing = Orchestrator::new(Arc::new(late), OrchestratorConfig::default());

        let report = racing
            .delete("team1", "weather-tool", WorkloadKind::Tool)
            .await
            .unwrap();

        assert_eq!(report.status, DeleteStatus::Deleted);
        assert_nothing_left(&cluster);
        let redeleted = cluster
            .operations()
            .iter()
            .filter(|op| op.verb == Verb::Delete && op.kind == ResourceKind::Deployment)
            .count();
        assert_eq!(redeleted, 2);
    }
}

mod query_tests {
    use super::*;

    fn labelled(kind: ResourceKind, name: &str, data: Value) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &kind.api_resource()).within("team1");
        obj.metadata.labels = Some(BTreeMap::from([
            (labels::TYPE.to_string(), "agent".to_string()),
            (labels::MANAGED_BY.to_string(), labels::DEFAULT_MANAGED_BY.to_string()),
        ]));
        obj.data = data;
        obj
    }

    #[tokio::test]
    async fn test_partially_ready_deployment_is_not_ready() {
        let (cluster, orchestrator) = setup();
        cluster.insert(
            ResourceKind::Deployment,
            labelled(
                ResourceKind::Deployment,
                "scaled",
                json!({ "spec": { "replicas": 3 }, "status": { "replicas": 3, "readyReplicas": 1 } }),
            ),
        );

        let report = orchestrator.status("team1", "scaled").await.unwrap();
        assert_eq!(report.ready_status, ReadyStatus::NotReady);
        let replicas = report.replica_status.unwrap();
        assert_eq!((replicas.desired, replicas.ready), (3, 1));
    }

    #[tokio::test]
    async fn test_completed_job_never_flaps_back() {
        let (cluster, orchestrator) = setup();
        cluster.insert(
            ResourceKind::Job,
            labelled(
                ResourceKind::Job,
                "nightly",
                json!({ "spec": {}, "status": {
                    "active": 1,
                    "succeeded": 1,
                    "conditions": [{ "type": "Complete", "status": "True" }]
                }}),
            ),
        );

        for _ in 0..5 {
            let report = orchestrator.status("team1", "nightly").await.unwrap();
            assert_eq!(report.ready_status, ReadyStatus::Completed);
            assert_eq!(report.workload_type, Some(WorkloadType::Job));
        }
    }

    #[tokio::test]
    async fn test_status_is_side_effect_free() {
        let (cluster, orchestrator) = setup();
        orchestrator
            .import(echo_agent("ghcr.io/kagenti/echo:1.0"))
            .await
            .unwrap();
        let before = cluster.operations();

        for _ in 0..3 {
            orchestrator.status("team1", "echo-agent").await.unwrap();
        }
        assert_eq!(cluster.operations(), before);
    }

    #[tokio::test]
    async fn test_list_filters_by_kind() {
        let (_cluster, orchestrator) = setup();
        let mut agent = echo_agent("ghcr.io/kagenti/echo:1.0");
        agent.framework = Some("LangGraph".to_string());
        agent.protocol_labels.insert("a2a".to_string());
        orchestrator.import(agent).await.unwrap();
        orchestrator
            .import(ImportRequest::from_image(
                "calc-tool",
                "team2",
                WorkloadKind::Tool,
                "ghcr.io/kagenti/calc:1.0",
            ))
            .await
            .unwrap();

        let all = orchestrator.list(None, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let tools = orchestrator.list(None, Some(WorkloadKind::Tool)).await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "calc-tool");
        assert_eq!(tools[0].protocols, vec!["mcp"]);
        assert_eq!(tools[0].ready_status, ReadyStatus::Ready);

        let team1 = orchestrator.list(Some("team1"), None).await.unwrap();
        assert_eq!(team1.len(), 1);
        assert_eq!(team1[0].framework.as_deref(), Some("LangGraph"));
        assert_eq!(team1[0].protocols, vec!["a2a"]);
    }
}

mod reconcile_tests {
    use super::*;

    #[tokio::test]
    async fn test_reconciler_deploys_finished_builds_once() {
        let (cluster, orchestrator) = setup();
        orchestrator.import(weather_tool()).await.unwrap();
        let reconciler = BuildReconciler::new(orchestrator, ReconcilerConfig::default());

        let first = reconciler.reconcile_once().await.unwrap();
        assert_eq!(first.finalized, 1);
        assert!(cluster
            .object(ResourceKind::Deployment, "team1", "weather-tool")
            .is_some());

        let second = reconciler.reconcile_once().await.unwrap();
        assert_eq!(second.finalized, 0);
        assert_eq!(second.scanned, 1);
    }

    #[tokio::test]
    async fn test_reconciler_skips_failed_builds_and_other_namespaces() {
        let (cluster, orchestrator) = setup();
        cluster.set_build_outcome_for(
            "weather-tool",
            BuildOutcome::Fail {
                reason: "BuildFailed".to_string(),
                message: "boom".to_string(),
            },
        );
        orchestrator.import(weather_tool()).await.unwrap();

        let mut other = weather_tool();
        other.name = "news-tool".to_string();
        other.namespace = "team2".to_string();
        orchestrator.import(other).await.unwrap();

        let reconciler = BuildReconciler::new(
            orchestrator,
            ReconcilerConfig {
                namespaces: vec!["team1".to_string()],
                ..ReconcilerConfig::default()
            },
        );
        let summary = reconciler.reconcile_once().await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.finalized, 0);
        assert_eq!(cluster.count(ResourceKind::Deployment), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciler_stops_on_shutdown() {
        let (_cluster, orchestrator) = setup();
        let health = crate::health::HealthRegistry::new();
        let reconciler = BuildReconciler::new(orchestrator, ReconcilerConfig::default())
            .with_health(health.clone());
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let handle = tokio::spawn(reconciler.run(rx));
        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(
            health.status_of(crate::health::components::RECONCILER).await,
            Some(crate::health::ComponentStatus::Healthy)
        );
    }
}
