//! Reading BuildRun and Build status into [`BuildJob`]s

use crate::labels;
use crate::models::{BuildJob, BuildPhase};
use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use serde_json::Value;

fn succeeded_condition(status: &Value) -> Option<&Value> {
    status["conditions"]
        .as_array()?
        .iter()
        .find(|c| c["type"].as_str() == Some("Succeeded"))
}

fn text(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Phase from the `Succeeded` condition
///
/// `True` and `False` are terminal. `Unknown` means running once the run has
/// a start time, pending before that.
pub fn phase_of(run: &DynamicObject) -> BuildPhase {
    let status = &run.data["status"];
    match succeeded_condition(status).and_then(|c| c["status"].as_str()) {
        Some("True") => BuildPhase::Succeeded,
        Some("False") => BuildPhase::Failed,
        _ if status["startTime"].is_string() => BuildPhase::Running,
        _ => BuildPhase::Pending,
    }
}

fn build_name_of(run: &DynamicObject) -> String {
    text(&run.data["spec"]["build"]["name"])
        .or_else(|| {
            run.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(labels::BUILD_NAME))
                .cloned()
        })
        .unwrap_or_default()
}

/// Planned output image recorded on a Build
pub fn build_output_image(build: &DynamicObject) -> Option<String> {
    text(&build.data["spec"]["output"]["image"])
}

/// Snapshot of one BuildRun
///
/// The output image falls back to the Build's planned image because build
/// controllers commonly report only the digest.
pub fn build_job(run: &DynamicObject, build: Option<&DynamicObject>) -> BuildJob {
    let status = &run.data["status"];
    let mut job = BuildJob::new(
        build_name_of(run),
        run.metadata.name.clone().unwrap_or_default(),
    );
    job.phase = phase_of(run);
    job.output_image = text(&status["output"]["image"]).or_else(|| build.and_then(build_output_image));
    job.output_digest = text(&status["output"]["digest"]);
    job.start_time = timestamp(&status["startTime"]);
    job.completion_time = timestamp(&status["completionTime"]);

    if job.phase == BuildPhase::Failed {
        let condition = succeeded_condition(status);
        job.failure_reason = text(&status["failureDetails"]["reason"])
            .or_else(|| condition.and_then(|c| text(&c["reason"])));
        job.failure_message = text(&status["failureDetails"]["message"])
            .or_else(|| condition.and_then(|c| text(&c["message"])));
    }
    job
}

/// Most recently created run; names break ties since they embed a timestamp
pub fn latest_run(runs: &[DynamicObject]) -> Option<&DynamicObject> {
    runs.iter().max_by(|a, b| {
        let created = |o: &DynamicObject| o.metadata.creation_timestamp.as_ref().map(|t| t.0);
        created(a)
            .cmp(&created(b))
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    })
}

/// `(registered, reason, message)` of a Build
pub fn registration(build: &DynamicObject) -> (bool, Option<String>, Option<String>) {
    let status = &build.data["status"];
    (
        status["registered"].as_str() == Some("True"),
        text(&status["reason"]),
        text(&status["message"]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use serde_json::json;

    fn run(name: &str, status: Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "shipwright.io/v1beta1",
            "kind": "BuildRun",
            "metadata": { "name": name, "namespace": "team1" },
            "spec": { "build": { "name": "weather-tool" } },
            "status": status,
        }))
        .unwrap()
    }

    #[test]
    fn test_phase_from_succeeded_condition() {
        let ok = run("r1", json!({ "conditions": [{ "type": "Succeeded", "status": "True" }] }));
        let failed = run("r2", json!({ "conditions": [{ "type": "Succeeded", "status": "False" }] }));
        let running = run(
            "r3",
            json!({ "startTime": "2026-01-01T00:00:00Z",
                    "conditions": [{ "type": "Succeeded", "status": "Unknown" }] }),
        );
        let pending = run("r4", json!({}));

        assert_eq!(phase_of(&ok), BuildPhase::Succeeded);
        assert_eq!(phase_of(&failed), BuildPhase::Failed);
        assert_eq!(phase_of(&running), BuildPhase::Running);
        assert_eq!(phase_of(&pending), BuildPhase::Pending);
    }

    #[test]
    fn test_failure_details_are_captured_verbatim() {
        let failed = run(
            "weather-tool-run-1",
            json!({
                "conditions": [{ "type": "Succeeded", "status": "False",
                                 "reason": "BuildFailed", "message": "step-build exited 1" }],
                "failureDetails": { "reason": "BuildFailed", "message": "Dockerfile not found" },
            }),
        );
        let job = build_job(&failed, None);
        assert_eq!(job.build_name, "weather-tool");
        assert_eq!(job.failure_reason.as_deref(), Some("BuildFailed"));
        assert_eq!(job.failure_message.as_deref(), Some("Dockerfile not found"));
    }

    #[test]
    fn test_output_image_falls_back_to_build() {
        let done = run(
            "r1",
            json!({
                "conditions": [{ "type": "Succeeded", "status": "True" }],
                "output": { "digest": "sha256:abc" },
                "completionTime": "2026-01-01T00:05:00Z",
            }),
        );
        let build: DynamicObject = serde_json::from_value(json!({
            "apiVersion": "shipwright.io/v1beta1",
            "kind": "Build",
            "metadata": { "name": "weather-tool", "namespace": "team1" },
            "spec": { "output": { "image": "registry.local/weather-tool:v0.0.1" } },
        }))
        .unwrap();

        let job = build_job(&done, Some(&build));
        assert_eq!(
            job.deployable_image().as_deref(),
            Some("registry.local/weather-tool:v0.0.1@sha256:abc")
        );
        assert!(job.completion_time.is_some());
        assert!(build_job(&done, None).deployable_image().is_none());
    }

    #[test]
    fn test_latest_run_by_creation_time() {
        let mut older = run("weather-tool-run-b", json!({}));
        older.metadata.creation_timestamp = Some(Time(
            DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
        ));
        let mut newer = run("weather-tool-run-a", json!({}));
        newer.metadata.creation_timestamp = Some(Time(
            DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().with_timezone(&Utc),
        ));

        let runs = vec![older, newer];
        assert_eq!(
            latest_run(&runs).and_then(|r| r.metadata.name.as_deref()),
            Some("weather-tool-run-a")
        );
        assert!(latest_run(&[]).is_none());
    }
}
