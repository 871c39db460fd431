use super::delete::marked_for_deletion;
use super::{ImportPhase, Orchestrator, PhaseTracker};
use crate::cluster::{PollOptions, ResourceKind, WaitError};
use crate::descriptor::{manifests, render, ValidatedImport};
use crate::error::{ImportError, Result, ValidationError, Violation};
use crate::labels;
use crate::models::{
    BuildJob, BuildPhase, FinalizeReport, ImportRequest, ImportResponse, ImportStatus,
    ReadyStatus, StatusReport, WorkloadType,
};
use crate::retry::apply_with_retry;
use crate::status::{normalize, parse_object_status};
use kube::api::DynamicObject;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const WORKLOAD_KINDS: [ResourceKind; 3] = [
    ResourceKind::Deployment,
    ResourceKind::StatefulSet,
    ResourceKind::Job,
];

fn type_label(obj: &DynamicObject) -> Option<&str> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::TYPE))
        .map(String::as_str)
}

fn owner(obj: &DynamicObject) -> &str {
    type_label(obj).unwrap_or("unmanaged")
}

impl Orchestrator {
    /// Interactive import
    ///
    /// Source imports return as soon as the BuildRun exists; deployment
    /// follows through [`Orchestrator::finish_build`] or the reconciler.
    /// Image imports apply the workload and return without waiting for it
    /// to become ready.
    pub async fn import(&self, req: ImportRequest) -> Result<ImportResponse> {
        let method = req.deployment_method.as_str();
        let mut phase = PhaseTracker::new(&self.logger, &req.namespace, &req.name);
        let validated = self.admit(req).await.map_err(|e| phase.fail(e))?;

        let started = if validated.is_source() {
            phase.enter(ImportPhase::Building);
            self.start_build(&validated)
                .await
                .map(|job| Some(job.build_run_name))
        } else {
            phase.enter(ImportPhase::Deploying);
            let image = validated.image.clone().unwrap_or_default();
            self.deploy(&validated, &image).await.map(|_| None)
        };
        let build_run_name = match started {
            Ok(run) => run,
            Err(e) => {
                self.metrics.inc_import(method, "failed");
                return Err(phase.fail(e));
            }
        };
        if !validated.is_source() {
            phase.enter(ImportPhase::AwaitingReady);
        }

        self.metrics.inc_import(method, "accepted");
        self.logger.log_import_accepted(
            &validated.namespace,
            &validated.name,
            validated.kind.as_str(),
            method,
            build_run_name.as_deref(),
        );
        Ok(ImportResponse {
            status: ImportStatus::Accepted,
            name: validated.name.clone(),
            namespace: validated.namespace.clone(),
            build_run_name,
            ready_status: None,
            error: None,
        })
    }

    /// Scripted import: build, deploy and wait for readiness within `timeout`
    ///
    /// A workload that settles in `Failed` is returned as a report, not an
    /// error; running out of time is [`ImportError::Timeout`].
    pub async fn import_and_wait(
        &self,
        req: ImportRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<StatusReport> {
        let deadline = Instant::now() + timeout;
        let remaining = |cap: Duration| cap.min(deadline.saturating_duration_since(Instant::now()));
        let method = req.deployment_method.as_str();
        let mut phase = PhaseTracker::new(&self.logger, &req.namespace, &req.name);

        let outcome = async {
            let validated = self.admit(req).await?;

            let image = if validated.is_source() {
                phase.enter(ImportPhase::Building);
                let started = self.start_build(&validated).await?;
                let planned = started.output_image.clone();
                let done = self
                    .wait_for_build(
                        &validated.namespace,
                        &started.build_run_name,
                        remaining(self.config.build_timeout),
                        cancel.clone(),
                    )
                    .await?;
                done.deployable_image()
                    .or(planned)
                    .unwrap_or_else(|| manifests::output_image(&validated, &self.config.descriptors))
            } else {
                validated.image.clone().unwrap_or_default()
            };

            phase.enter(ImportPhase::Deploying);
            self.deploy(&validated, &image).await?;

            phase.enter(ImportPhase::AwaitingReady);
            let ready = self
                .await_ready(
                    &validated.namespace,
                    &validated.name,
                    validated.workload_type,
                    remaining(self.config.ready_timeout),
                    cancel.clone(),
                )
                .await?;
            Ok::<_, ImportError>((validated, ready))
        }
        .await;

        match outcome {
            Ok((validated, ready)) => {
                if ready.is_success() {
                    phase.enter(ImportPhase::Done);
                    self.metrics.inc_import(method, "ready");
                } else {
                    phase.enter(ImportPhase::Failed);
                    self.metrics.inc_import(method, "failed");
                }
                self.status(&validated.namespace, &validated.name).await
            }
            Err(e) => {
                let result = match &e {
                    ImportError::Validation(_) => "rejected",
                    ImportError::Timeout { .. } => "timeout",
                    _ => "failed",
                };
                if !matches!(e, ImportError::Validation(_)) {
                    self.metrics.inc_import(method, result);
                }
                Err(phase.fail(e))
            }
        }
    }

    /// Wait for a BuildRun started by an interactive import, then deploy
    pub async fn finish_build(
        &self,
        namespace: &str,
        name: &str,
        build_run_name: &str,
        cancel: CancellationToken,
    ) -> Result<FinalizeReport> {
        self.wait_for_build(namespace, build_run_name, self.config.build_timeout, cancel)
            .await?;
        self.finalize(namespace, name).await
    }

    /// Deploy the workload of a source import whose latest run succeeded
    ///
    /// Everything needed is read back from the cluster: the request stored
    /// on the Build and the image reported by the BuildRun. Builds marked
    /// for deletion are never deployed.
    pub async fn finalize(&self, namespace: &str, name: &str) -> Result<FinalizeReport> {
        let build = self
            .cluster
            .get(ResourceKind::Build, namespace, name)
            .await?
            .ok_or_else(|| ImportError::not_found("Build", namespace, name))?;
        let job = self
            .builds
            .latest(namespace, name)
            .await?
            .ok_or_else(|| ImportError::not_found("BuildRun", namespace, name))?;

        let mut report = FinalizeReport {
            name: name.to_string(),
            namespace: namespace.to_string(),
            build_run_name: job.build_run_name.clone(),
            build_phase: job.phase,
            deployed: false,
            image: None,
        };
        if marked_for_deletion(&build) {
            debug!(namespace = %namespace, name = %name, "Build is being deleted, not deploying");
            return Ok(report);
        }
        match job.phase {
            BuildPhase::Succeeded => {}
            BuildPhase::Failed => return Err(build_failure(&job)),
            _ => {
                debug!(namespace = %namespace, name = %name, phase = %job.phase, "Build not finished, nothing to deploy");
                return Ok(report);
            }
        }

        let validated = stored_request(&build)?;
        let image = job
            .deployable_image()
            .unwrap_or_else(|| manifests::output_image(&validated, &self.config.descriptors));

        let mut phase = PhaseTracker::new(&self.logger, namespace, name);
        phase.phase = ImportPhase::Building;
        phase.enter(ImportPhase::Deploying);
        self.deploy(&validated, &image).await.map_err(|e| phase.fail(e))?;
        phase.enter(ImportPhase::AwaitingReady);

        report.deployed = true;
        report.image = Some(image);
        Ok(report)
    }

    /// Validation plus the name collision check; nothing is mutated
    async fn admit(&self, req: ImportRequest) -> Result<ValidatedImport> {
        let namespace = req.namespace.clone();
        let name = req.name.clone();
        let method = req.deployment_method.as_str();

        let checked = match ValidatedImport::new(req) {
            Ok(validated) => self.check_collision(&validated).await.map(|_| validated),
            Err(e) => Err(e.into()),
        };
        if let Err(ImportError::Validation(e)) = &checked {
            self.metrics.inc_import(method, "rejected");
            self.logger.log_import_rejected(&namespace, &name, &e.to_string());
        }
        checked
    }

    /// Refuse to take over a same-named resource owned by another kind, a
    /// workload of a different type, or a source Build an image import would
    /// leave behind
    async fn check_collision(&self, req: &ValidatedImport) -> Result<()> {
        let kind = req.kind.as_str();
        let mut violations = Vec::new();

        for workload_kind in WORKLOAD_KINDS {
            let Some(existing) = self.cluster.get(workload_kind, &req.namespace, &req.name).await?
            else {
                continue;
            };
            if type_label(&existing) != Some(kind) {
                violations.push(Violation::new(
                    "name",
                    format!(
                        "{} {}/{} already exists and belongs to {}",
                        workload_kind,
                        req.namespace,
                        req.name,
                        owner(&existing)
                    ),
                ));
            } else if workload_kind != ResourceKind::for_workload(req.workload_type) {
                violations.push(Violation::new(
                    "workloadType",
                    format!(
                        "{} {}/{} already exists; delete it before importing as {}",
                        workload_kind, req.namespace, req.name, req.workload_type
                    ),
                ));
            }
        }

        let service_name = manifests::service_name(&req.name, req.kind);
        if let Some(existing) = self
            .cluster
            .get(ResourceKind::Service, &req.namespace, &service_name)
            .await?
        {
            if type_label(&existing) != Some(kind) {
                violations.push(Violation::new(
                    "name",
                    format!(
                        "Service {}/{} already exists and belongs to {}",
                        req.namespace,
                        service_name,
                        owner(&existing)
                    ),
                ));
            }
        }

        if let Some(existing) = self
            .cluster
            .get(ResourceKind::Build, &req.namespace, &req.name)
            .await?
        {
            if type_label(&existing) != Some(kind) {
                violations.push(Violation::new(
                    "name",
                    format!(
                        "Build {}/{} already exists and belongs to {}",
                        req.namespace,
                        req.name,
                        owner(&existing)
                    ),
                ));
            } else if marked_for_deletion(&existing) {
                violations.push(Violation::new(
                    "name",
                    format!(
                        "{}/{} is being deleted; finish the delete before importing it again",
                        req.namespace, req.name
                    ),
                ));
            } else if !req.is_source() {
                violations.push(Violation::new(
                    "deploymentMethod",
                    format!(
                        "Build {}/{} exists from a source import; delete it before importing an image",
                        req.namespace, req.name
                    ),
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations }.into())
        }
    }

    async fn start_build(&self, req: &ValidatedImport) -> Result<BuildJob> {
        let resources = render(req, &self.config.descriptors);
        let build = resources
            .build
            .ok_or_else(|| ValidationError::single("deploymentMethod", "not a source import"))?;
        self.builds.start(&build, req.kind).await
    }

    /// Turn a BuildRun outcome into success, [`ImportError::BuildFailure`]
    /// or [`ImportError::Timeout`]
    async fn wait_for_build(
        &self,
        namespace: &str,
        build_run_name: &str,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<BuildJob> {
        let started = Instant::now();
        let job = self
            .builds
            .await_completion(namespace, build_run_name, timeout, cancel.clone())
            .await?;
        match job.phase {
            BuildPhase::Succeeded => Ok(job),
            BuildPhase::Failed => Err(build_failure(&job)),
            _ => Err(ImportError::Timeout {
                what: format!("BuildRun {}/{}", namespace, build_run_name),
                elapsed: started.elapsed(),
                cancelled: cancel.is_cancelled(),
            }),
        }
    }

    /// Apply the workload, then its Service
    async fn deploy(&self, req: &ValidatedImport, image: &str) -> Result<()> {
        let resources = render(req, &self.config.descriptors);
        let workload = manifests::workload(req, image, &self.config.descriptors);
        apply_with_retry(
            self.cluster.as_ref(),
            resources.workload_kind,
            &workload,
            &self.config.retry,
            &self.metrics,
        )
        .await?;

        if let Some(service) = &resources.service {
            apply_with_retry(
                self.cluster.as_ref(),
                ResourceKind::Service,
                service,
                &self.config.retry,
                &self.metrics,
            )
            .await?;
        }

        self.logger.log_workload_applied(
            &req.namespace,
            &req.name,
            req.workload_type.as_str(),
            image,
            resources
                .service
                .as_ref()
                .and_then(|s| s.metadata.name.as_deref()),
        );
        Ok(())
    }

    /// Wait for a terminal ready status: Ready, Completed or Failed
    pub async fn await_ready(
        &self,
        namespace: &str,
        name: &str,
        workload_type: WorkloadType,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<ReadyStatus> {
        let started = Instant::now();
        let kind = ResourceKind::for_workload(workload_type);
        let opts = PollOptions::new(self.config.poll_interval, timeout).with_cancel(cancel);
        let settled = |obj: Option<&DynamicObject>| {
            obj.map_or(false, |o| {
                normalize(workload_type, parse_object_status(workload_type, o).as_ref()).is_terminal()
            })
        };

        let waited = self
            .cluster
            .watch_or_poll(kind, namespace, name, &settled, &opts)
            .await;
        self.metrics.observe_ready_wait(started.elapsed().as_secs_f64());

        match waited {
            Ok(Some(obj)) => {
                let status = normalize(workload_type, parse_object_status(workload_type, &obj).as_ref());
                self.logger.log_workload_ready(namespace, name, status);
                Ok(status)
            }
            Ok(None) => Err(ImportError::not_found(kind.as_str(), namespace, name)),
            Err(WaitError::TimedOut { elapsed, cancelled }) => Err(ImportError::Timeout {
                what: format!("{} {}/{} to become ready", kind, namespace, name),
                elapsed,
                cancelled,
            }),
            Err(WaitError::Cluster(e)) => Err(e.into()),
        }
    }
}

fn build_failure(job: &BuildJob) -> ImportError {
    ImportError::BuildFailure {
        build_run: job.build_run_name.clone(),
        reason: job
            .failure_reason
            .clone()
            .unwrap_or_else(|| "Failed".to_string()),
        message: job.failure_message.clone().unwrap_or_default(),
    }
}

/// The import request recorded on a Build when it was applied
fn stored_request(build: &DynamicObject) -> Result<ValidatedImport> {
    let raw = build
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::IMPORT_REQUEST_ANNOTATION))
        .ok_or_else(|| {
            ValidationError::single(
                labels::IMPORT_REQUEST_ANNOTATION,
                "Build carries no import request",
            )
        })?;
    let req: ImportRequest = serde_json::from_str(raw).map_err(|e| {
        ValidationError::single(
            labels::IMPORT_REQUEST_ANNOTATION,
            format!("stored import request is unreadable: {}", e),
        )
    })?;
    Ok(ValidatedImport::new(req)?)
}
