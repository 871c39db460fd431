//! Build phase controller
//!
//! Drives one build attempt: apply the Build, create a uniquely named
//! BuildRun, then wait for a terminal `Succeeded` condition. All state lives
//! in the cluster objects, so a controller can be dropped and recreated at
//! any point without losing track of a build.

use super::phase::{build_job, build_output_image, latest_run, phase_of, registration};
use crate::cluster::{ClusterClient, PollOptions, ResourceKind, WaitError};
use crate::descriptor::{manifests, BuildDescriptor, DescriptorConfig};
use crate::error::{ImportError, Result};
use crate::labels;
use crate::models::{BuildInfo, BuildJob, BuildPhase, WorkloadKind};
use crate::observability::{ImporterMetrics, StructuredLogger};
use crate::retry::{apply_with_retry, RetryPolicy};
use chrono::Utc;
use kube::api::DynamicObject;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fresh names tried before giving up on BuildRun name conflicts
const MAX_NAME_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct BuildController {
    cluster: Arc<dyn ClusterClient>,
    descriptors: DescriptorConfig,
    poll_interval: Duration,
    retry: RetryPolicy,
    metrics: ImporterMetrics,
    logger: StructuredLogger,
}

fn run_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..5].to_string()
}

fn kind_of(build: &DynamicObject) -> WorkloadKind {
    build
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::TYPE))
        .and_then(|k| WorkloadKind::parse(k))
        .unwrap_or(WorkloadKind::Agent)
}

fn strategy_of(build: &DynamicObject) -> String {
    build.data["spec"]["strategy"]["name"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

impl BuildController {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        descriptors: DescriptorConfig,
        poll_interval: Duration,
        retry: RetryPolicy,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            cluster,
            descriptors,
            poll_interval,
            retry,
            metrics: ImporterMetrics::new(),
            logger,
        }
    }

    /// Apply the Build, then trigger a first BuildRun for it
    pub async fn start(&self, build: &BuildDescriptor, kind: WorkloadKind) -> Result<BuildJob> {
        let applied = apply_with_retry(
            self.cluster.as_ref(),
            ResourceKind::Build,
            &build.object,
            &self.retry,
            &self.metrics,
        )
        .await?;
        let namespace = applied.metadata.namespace.clone().unwrap_or_default();
        let name = applied.metadata.name.clone().unwrap_or_default();
        debug!(namespace = %namespace, build = %name, "Build applied");

        let mut job = self.trigger(&namespace, &name, kind, &build.strategy).await?;
        job.output_image = Some(build.output_image.clone());
        Ok(job)
    }

    /// Create a new BuildRun for an existing Build
    ///
    /// Names are never reused; a conflicting name is replaced by a fresh one.
    pub async fn trigger(
        &self,
        namespace: &str,
        build_name: &str,
        kind: WorkloadKind,
        strategy: &str,
    ) -> Result<BuildJob> {
        let mut name_attempt = 1;
        let mut attempt = 1;
        loop {
            let run_name = manifests::build_run_name(build_name, Utc::now(), &run_suffix());
            let run = manifests::build_run(
                namespace,
                build_name,
                &run_name,
                kind,
                &self.descriptors.managed_by,
            );

            match self.cluster.create(ResourceKind::BuildRun, &run).await {
                Ok(created) => {
                    self.logger
                        .log_build_started(namespace, build_name, &run_name, strategy);
                    let mut job = build_job(&created, None);
                    job.phase = BuildPhase::Pending.advance(job.phase);
                    return Ok(job);
                }
                Err(e) if e.is_conflict() && name_attempt < MAX_NAME_ATTEMPTS => {
                    warn!(namespace = %namespace, build_run = %run_name, "BuildRun name taken, regenerating");
                    name_attempt += 1;
                }
                Err(e) if e.is_transient() && !e.is_conflict() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        namespace = %namespace,
                        build_run = %run_name,
                        attempt = attempt,
                        error = %e,
                        "Transient error creating BuildRun, retrying"
                    );
                    self.metrics.inc_apply_retries();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(ImportError::Apply {
                        kind: ResourceKind::BuildRun.to_string(),
                        namespace: namespace.to_string(),
                        name: run_name,
                        attempts: attempt + name_attempt - 1,
                        source,
                    })
                }
            }
        }
    }

    /// Rebuild: trigger a run of a Build that already exists
    pub async fn trigger_existing(&self, namespace: &str, build_name: &str) -> Result<BuildJob> {
        let build = self
            .cluster
            .get(ResourceKind::Build, namespace, build_name)
            .await?
            .ok_or_else(|| ImportError::not_found("Build", namespace, build_name))?;

        let mut job = self
            .trigger(namespace, build_name, kind_of(&build), &strategy_of(&build))
            .await?;
        job.output_image = build_output_image(&build);
        Ok(job)
    }

    /// Wait for the run to reach `Succeeded` or `Failed`
    ///
    /// Running out of time, or being cancelled, yields a job in phase
    /// `Unknown` rather than an error: the build may still finish
    /// server-side.
    pub async fn await_completion(
        &self,
        namespace: &str,
        build_run_name: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<BuildJob> {
        let started = Instant::now();
        let opts = PollOptions::new(self.poll_interval, timeout).with_cancel(cancel);
        let terminal = |obj: Option<&DynamicObject>| obj.map_or(true, |o| phase_of(o).is_terminal());

        let waited = self
            .cluster
            .watch_or_poll(ResourceKind::BuildRun, namespace, build_run_name, &terminal, &opts)
            .await;

        let run = match waited {
            Ok(Some(run)) => run,
            Ok(None) => return Err(ImportError::not_found("BuildRun", namespace, build_run_name)),
            Err(WaitError::TimedOut { elapsed, cancelled }) => {
                let run = self
                    .cluster
                    .get(ResourceKind::BuildRun, namespace, build_run_name)
                    .await?
                    .ok_or_else(|| ImportError::not_found("BuildRun", namespace, build_run_name))?;
                let mut job = build_job(&run, None);
                job.phase = BuildPhase::Unknown;
                self.logger.log_build_finished(
                    namespace,
                    build_run_name,
                    BuildPhase::Unknown,
                    elapsed.as_secs_f64(),
                    Some(if cancelled { "cancelled" } else { "timed out" }),
                );
                return Ok(job);
            }
            Err(WaitError::Cluster(e)) => return Err(e.into()),
        };

        let build = match run.data["spec"]["build"]["name"].as_str() {
            Some(build_name) => {
                self.cluster
                    .get(ResourceKind::Build, namespace, build_name)
                    .await?
            }
            None => None,
        };
        let job = build_job(&run, build.as_ref());

        let elapsed = match (job.start_time, job.completion_time) {
            (Some(start), Some(end)) if end >= start => {
                (end - start).to_std().unwrap_or_default().as_secs_f64()
            }
            _ => started.elapsed().as_secs_f64(),
        };
        self.metrics.observe_build_duration(elapsed);
        let detail = match job.phase {
            BuildPhase::Succeeded => job.deployable_image(),
            _ => job.failure_message.clone(),
        };
        self.logger
            .log_build_finished(namespace, build_run_name, job.phase, elapsed, detail.as_deref());
        Ok(job)
    }

    /// Latest BuildRun of a Build, if any
    pub async fn latest(&self, namespace: &str, build_name: &str) -> Result<Option<BuildJob>> {
        let runs = self
            .cluster
            .list(
                ResourceKind::BuildRun,
                Some(namespace),
                &labels::build_runs_selector(build_name),
            )
            .await?;
        let Some(run) = latest_run(&runs) else {
            return Ok(None);
        };
        let build = self
            .cluster
            .get(ResourceKind::Build, namespace, build_name)
            .await?;
        Ok(Some(build_job(run, build.as_ref())))
    }

    pub async fn info(&self, namespace: &str, build_name: &str) -> Result<BuildInfo> {
        let build = self
            .cluster
            .get(ResourceKind::Build, namespace, build_name)
            .await?
            .ok_or_else(|| ImportError::not_found("Build", namespace, build_name))?;
        let (registered, registration_reason, registration_message) = registration(&build);
        let source = &build.data["spec"]["source"];
        let field = |v: &serde_json::Value| v.as_str().unwrap_or_default().to_string();

        Ok(BuildInfo {
            name: build_name.to_string(),
            namespace: namespace.to_string(),
            registered,
            registration_reason,
            registration_message,
            strategy: strategy_of(&build),
            git_url: field(&source["git"]["url"]),
            git_revision: field(&source["git"]["revision"]),
            context_dir: field(&source["contextDir"]),
            output_image: build_output_image(&build).unwrap_or_default(),
            latest_run: self.latest(namespace, build_name).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{BuildOutcome, Verb};
    use crate::cluster::MemoryCluster;
    use crate::descriptor::{render, ValidatedImport};
    use crate::models::ImportRequest;

    fn controller(cluster: Arc<MemoryCluster>) -> BuildController {
        BuildController::new(
            cluster,
            DescriptorConfig::default(),
            Duration::from_secs(5),
            RetryPolicy::default(),
            StructuredLogger::new("test"),
        )
    }

    fn weather_tool() -> BuildDescriptor {
        let req = ImportRequest::from_source(
            "weather-tool",
            "team1",
            WorkloadKind::Tool,
            "https://github.com/kagenti/agent-examples",
            "mcp/weather_tool",
        );
        let validated = ValidatedImport::new(req).unwrap();
        render(&validated, &DescriptorConfig::default()).build.unwrap()
    }

    #[tokio::test]
    async fn test_start_applies_build_then_creates_run() {
        let cluster = Arc::new(MemoryCluster::new());
        let controller = controller(cluster.clone());

        let job = controller.start(&weather_tool(), WorkloadKind::Tool).await.unwrap();
        assert_eq!(job.build_name, "weather-tool");
        assert!(job.build_run_name.starts_with("weather-tool-run-"));
        assert_eq!(
            cluster.mutation_order(),
            vec![(Verb::Apply, ResourceKind::Build), (Verb::Create, ResourceKind::BuildRun)]
        );
    }

    #[tokio::test]
    async fn test_every_trigger_gets_a_fresh_run_name() {
        let cluster = Arc::new(MemoryCluster::new());
        let controller = controller(cluster.clone());
        let first = controller.start(&weather_tool(), WorkloadKind::Tool).await.unwrap();
        let second = controller.trigger_existing("team1", "weather-tool").await.unwrap();

        assert_ne!(first.build_run_name, second.build_run_name);
        assert_eq!(cluster.count(ResourceKind::BuildRun), 2);
        assert_eq!(cluster.count(ResourceKind::Build), 1);
    }

    #[tokio::test]
    async fn test_conflicting_run_name_is_regenerated() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_next(Verb::Create, Some(ResourceKind::BuildRun), 409, 1);
        let controller = controller(cluster.clone());

        let job = controller.start(&weather_tool(), WorkloadKind::Tool).await.unwrap();
        assert!(cluster
            .object(ResourceKind::BuildRun, "team1", &job.build_run_name)
            .is_some());
    }

    #[tokio::test]
    async fn test_await_completion_reports_output_image() {
        let cluster = Arc::new(MemoryCluster::new());
        let controller = controller(cluster.clone());
        let job = controller.start(&weather_tool(), WorkloadKind::Tool).await.unwrap();

        let done = controller
            .await_completion("team1", &job.build_run_name, Duration::from_secs(60), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.phase, BuildPhase::Succeeded);
        let image = done.deployable_image().unwrap();
        assert!(image.starts_with("registry.cr-system.svc.cluster.local:5000/weather-tool:v0.0.1@sha256:"));
    }

    #[tokio::test]
    async fn test_failed_build_carries_reason() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.set_build_outcome(BuildOutcome::Fail {
            reason: "BuildFailed".to_string(),
            message: "exit status 1".to_string(),
        });
        let controller = controller(cluster.clone());
        let job = controller.start(&weather_tool(), WorkloadKind::Tool).await.unwrap();

        let done = controller
            .await_completion("team1", &job.build_run_name, Duration::from_secs(60), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.phase, BuildPhase::Failed);
        assert_eq!(done.failure_reason.as_deref(), Some("BuildFailed"));
        assert_eq!(done.failure_message.as_deref(), Some("exit status 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_unknown_not_failed() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.set_build_outcome(BuildOutcome::Hang);
        let controller = controller(cluster.clone());
        let job = controller.start(&weather_tool(), WorkloadKind::Tool).await.unwrap();

        let waited = controller
            .await_completion("team1", &job.build_run_name, Duration::from_secs(30), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(waited.phase, BuildPhase::Unknown);
        assert!(waited.failure_message.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_wait_keeps_run_identity() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.set_build_outcome(BuildOutcome::Hang);
        let controller = controller(cluster.clone());
        let job = controller.start(&weather_tool(), WorkloadKind::Tool).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let waited = controller
            .await_completion("team1", &job.build_run_name, Duration::from_secs(30), cancel.clone())
            .await
            .unwrap();
        assert_eq!(waited.phase, BuildPhase::Unknown);
        assert_eq!(waited.build_name, "weather-tool");
        assert_eq!(waited.build_run_name, job.build_run_name);

        // a failed read after the wait is reported, not papered over
        cluster.fail_next(Verb::Get, Some(ResourceKind::BuildRun), 503, 1);
        let err = controller
            .await_completion("team1", &job.build_run_name, Duration::from_secs(30), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Cluster(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_info_and_latest() {
        let cluster = Arc::new(MemoryCluster::new());
        let controller = controller(cluster.clone());
        assert!(matches!(
            controller.info("team1", "weather-tool").await,
            Err(ImportError::NotFound { .. })
        ));

        controller.start(&weather_tool(), WorkloadKind::Tool).await.unwrap();
        let info = controller.info("team1", "weather-tool").await.unwrap();
        assert!(info.registered);
        assert_eq!(info.strategy, labels::INSECURE_PUSH_STRATEGY);
        assert_eq!(info.context_dir, "mcp/weather_tool");
        assert_eq!(info.git_revision, "main");
        assert_eq!(info.latest_run.unwrap().phase, BuildPhase::Succeeded);
    }
}
