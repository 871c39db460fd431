//! Rendering of Build, BuildRun, workload and Service objects
//!
//! Output is a pure function of the validated request and the descriptor
//! configuration. Rendering the same request twice yields identical objects.

use super::{BuildDescriptor, DescriptorConfig, ValidatedImport};
use crate::cluster::ResourceKind;
use crate::labels as keys;
use crate::models::{EnvVar, ImportRequest, WorkloadKind, WorkloadType};
use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

const MAX_NAME: usize = 63;
const CPU_REQUEST: &str = "100m";
const MEMORY_REQUEST: &str = "256Mi";
const CPU_LIMIT: &str = "500m";
const MEMORY_LIMIT: &str = "1Gi";
const RETENTION_SUCCEEDED: u32 = 3;
const RETENTION_FAILED: u32 = 3;
const JOB_BACKOFF_LIMIT: u32 = 3;
const CACHE_VOLUME: &str = "cache";
const CACHE_MOUNT_PATH: &str = "/app/.cache";

/// Service name: agents reuse the workload name, tools get the `-mcp` suffix
pub fn service_name(name: &str, kind: WorkloadKind) -> String {
    match kind {
        WorkloadKind::Agent => name.to_string(),
        WorkloadKind::Tool => format!("{}{}", name, keys::TOOL_SERVICE_SUFFIX),
    }
}

fn container_name(kind: WorkloadKind) -> &'static str {
    match kind {
        WorkloadKind::Agent => "agent",
        WorkloadKind::Tool => "mcp",
    }
}

/// Labels used by workload selectors; never change for the life of a workload
pub fn selector_labels(req: &ImportRequest) -> BTreeMap<String, String> {
    BTreeMap::from([
        (keys::TYPE.to_string(), req.kind.as_str().to_string()),
        (keys::APP_NAME.to_string(), req.name.clone()),
    ])
}

/// Full label set stamped on every object rendered for a request
pub fn resource_labels(req: &ImportRequest, cfg: &DescriptorConfig) -> BTreeMap<String, String> {
    let mut labels = selector_labels(req);
    labels.insert(keys::MANAGED_BY.to_string(), cfg.managed_by.clone());
    labels.insert(keys::CREATED_BY.to_string(), cfg.managed_by.clone());
    labels.insert(keys::COMPONENT.to_string(), req.kind.as_str().to_string());
    labels.insert(
        keys::WORKLOAD_TYPE.to_string(),
        req.workload_type.as_str().to_string(),
    );
    if let Some(framework) = req.framework.as_deref().filter(|f| !f.is_empty()) {
        labels.insert(keys::FRAMEWORK.to_string(), framework.to_string());
    }
    for protocol in &req.protocol_labels {
        labels.insert(keys::protocol_label(protocol), String::new());
    }
    if req.kind == WorkloadKind::Tool {
        labels.insert(keys::TRANSPORT.to_string(), keys::STREAMABLE_HTTP.to_string());
    }
    labels
}

fn object(
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    spec: Value,
) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &kind.api_resource()).within(namespace);
    obj.metadata.labels = Some(labels);
    if !annotations.is_empty() {
        obj.metadata.annotations = Some(annotations);
    }
    obj.data = json!({ "spec": spec });
    obj
}

/// `<registry>/<name>:<tag>`
pub fn output_image(req: &ImportRequest, cfg: &DescriptorConfig) -> String {
    let registry = req
        .registry
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(&cfg.default_registry)
        .trim_end_matches('/');
    let tag = req
        .image_tag
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(&cfg.default_image_tag);
    format!("{}/{}:{}", registry, req.name, tag)
}

pub fn build(req: &ValidatedImport, cfg: &DescriptorConfig) -> BuildDescriptor {
    let build_config = req.build_config.clone().unwrap_or_default();
    let registry = req
        .registry
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(&cfg.default_registry);
    let strategy = super::strategy::select_strategy(registry, build_config.strategy.as_deref());
    let output_image = output_image(req, cfg);

    let mut git = json!({
        "url": req.git_url.clone().unwrap_or_default(),
        "revision": req.git_revision.clone().unwrap_or_else(|| "main".to_string()),
    });
    if let Some(secret) = req.clone_secret.as_deref().filter(|s| !s.is_empty()) {
        git["cloneSecret"] = json!(secret);
    }

    let mut params = vec![json!({
        "name": "dockerfile",
        "value": build_config.dockerfile.as_deref().unwrap_or(keys::DEFAULT_DOCKERFILE),
    })];
    if !build_config.build_args.is_empty() {
        let values: Vec<Value> = build_config
            .build_args
            .iter()
            .map(|arg| json!({ "value": arg }))
            .collect();
        params.push(json!({ "name": "build-args", "values": values }));
    }

    let mut output = json!({ "image": output_image });
    if let Some(secret) = req.push_secret.as_deref().filter(|s| !s.is_empty()) {
        output["pushSecret"] = json!(secret);
    }

    let spec = json!({
        "source": {
            "type": "Git",
            "git": git,
            "contextDir": req.context_dir.clone().unwrap_or_else(|| ".".to_string()),
        },
        "strategy": {
            "name": strategy,
            "kind": "ClusterBuildStrategy",
        },
        "paramValues": params,
        "output": output,
        "timeout": build_config.timeout.as_deref().unwrap_or(keys::DEFAULT_BUILD_TIMEOUT),
        "retention": {
            "succeededLimit": RETENTION_SUCCEEDED,
            "failedLimit": RETENTION_FAILED,
        },
    });

    let mut annotations = BTreeMap::new();
    annotations.insert(
        keys::IMPORT_REQUEST_ANNOTATION.to_string(),
        serde_json::to_string(req.request()).unwrap_or_default(),
    );

    BuildDescriptor {
        object: object(
            ResourceKind::Build,
            &req.namespace,
            &req.name,
            resource_labels(req, cfg),
            annotations,
            spec,
        ),
        strategy,
        output_image,
    }
}

/// `<build>-run-<UTC timestamp>-<suffix>`, shortened to fit a DNS label
pub fn build_run_name(build_name: &str, now: DateTime<Utc>, suffix: &str) -> String {
    let tail = format!("-run-{}-{}", now.format("%Y%m%d%H%M%S"), suffix);
    let room = MAX_NAME.saturating_sub(tail.len());
    let prefix: String = build_name.chars().take(room).collect();
    format!("{}{}", prefix.trim_end_matches('-'), tail)
}

pub fn build_run(
    namespace: &str,
    build_name: &str,
    run_name: &str,
    kind: WorkloadKind,
    managed_by: &str,
) -> DynamicObject {
    let labels = BTreeMap::from([
        (keys::TYPE.to_string(), kind.as_str().to_string()),
        (keys::BUILD_NAME.to_string(), build_name.to_string()),
        (keys::MANAGED_BY.to_string(), managed_by.to_string()),
        (keys::CREATED_BY.to_string(), managed_by.to_string()),
    ]);
    object(
        ResourceKind::BuildRun,
        namespace,
        run_name,
        labels,
        BTreeMap::new(),
        json!({ "build": { "name": build_name } }),
    )
}

fn env_entry(var: &EnvVar) -> Value {
    if let Some(value) = &var.value {
        return json!({ "name": var.name, "value": value });
    }
    let source = var.value_from.clone().unwrap_or_default();
    let value_from = match (source.secret_key_ref, source.config_map_key_ref) {
        (Some(r), _) => json!({ "secretKeyRef": { "name": r.name, "key": r.key } }),
        (None, Some(r)) => json!({ "configMapKeyRef": { "name": r.name, "key": r.key } }),
        (None, None) => json!({}),
    };
    json!({ "name": var.name, "valueFrom": value_from })
}

/// `PORT` and `HOST` defaults first, then the user's variables
fn container_env(req: &ImportRequest) -> Vec<Value> {
    let user: HashSet<&str> = req.env_vars.iter().map(|v| v.name.as_str()).collect();
    let mut env = Vec::new();
    if let Some(port) = req.service_ports.first() {
        if !user.contains("PORT") {
            env.push(json!({ "name": "PORT", "value": port.target_port.to_string() }));
        }
    }
    if !user.contains("HOST") {
        env.push(json!({ "name": "HOST", "value": "0.0.0.0" }));
    }
    env.extend(req.env_vars.iter().map(env_entry));
    env
}

fn pod_template(req: &ImportRequest, image: &str, labels: &BTreeMap<String, String>) -> Value {
    let ports: Vec<Value> = req
        .service_ports
        .iter()
        .map(|p| json!({ "name": p.name, "containerPort": p.target_port, "protocol": p.protocol }))
        .collect();

    let container = json!({
        "name": container_name(req.kind),
        "image": image,
        "imagePullPolicy": "Always",
        "env": container_env(req),
        "ports": ports,
        "resources": {
            "requests": { "cpu": CPU_REQUEST, "memory": MEMORY_REQUEST },
            "limits": { "cpu": CPU_LIMIT, "memory": MEMORY_LIMIT },
        },
        "volumeMounts": [{ "name": CACHE_VOLUME, "mountPath": CACHE_MOUNT_PATH }],
    });

    let mut spec = json!({
        "containers": [container],
        "volumes": [{ "name": CACHE_VOLUME, "emptyDir": {} }],
    });
    let pull_secret = req
        .image_pull_secret
        .as_deref()
        .or(req.push_secret.as_deref())
        .filter(|s| !s.is_empty());
    if let Some(secret) = pull_secret {
        spec["imagePullSecrets"] = json!([{ "name": secret }]);
    }
    if req.workload_type == WorkloadType::Job {
        spec["restartPolicy"] = json!("OnFailure");
    }

    json!({ "metadata": { "labels": labels }, "spec": spec })
}

/// Deployment, StatefulSet or Job running `image`
pub fn workload(req: &ValidatedImport, image: &str, cfg: &DescriptorConfig) -> DynamicObject {
    let labels = resource_labels(req, cfg);
    let template = pod_template(req, image, &labels);
    let selector = json!({ "matchLabels": selector_labels(req) });

    let spec = match req.workload_type {
        WorkloadType::Deployment => json!({
            "replicas": 1,
            "selector": selector,
            "template": template,
        }),
        WorkloadType::StatefulSet => json!({
            "replicas": 1,
            "serviceName": service_name(&req.name, req.kind),
            "selector": selector,
            "template": template,
        }),
        WorkloadType::Job => json!({
            "backoffLimit": JOB_BACKOFF_LIMIT,
            "template": template,
        }),
    };

    let mut annotations = BTreeMap::new();
    if let Some(description) = req.description.as_deref().filter(|d| !d.is_empty()) {
        annotations.insert(keys::DESCRIPTION_ANNOTATION.to_string(), description.to_string());
    }
    if req.git_url.is_some() {
        annotations.insert(keys::BUILD_ANNOTATION.to_string(), req.name.clone());
    }

    object(
        ResourceKind::for_workload(req.workload_type),
        &req.namespace,
        &req.name,
        labels,
        annotations,
        spec,
    )
}

/// ClusterIP Service in front of the workload; Jobs get none
pub fn service(req: &ValidatedImport, cfg: &DescriptorConfig) -> Option<DynamicObject> {
    if !req.workload_type.has_service() {
        return None;
    }
    let ports: Vec<Value> = req
        .service_ports
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "port": p.port,
                "targetPort": p.target_port,
                "protocol": p.protocol,
            })
        })
        .collect();

    let spec = json!({
        "type": "ClusterIP",
        "selector": selector_labels(req),
        "ports": ports,
    });

    Some(object(
        ResourceKind::Service,
        &req.namespace,
        &service_name(&req.name, req.kind),
        resource_labels(req, cfg),
        BTreeMap::new(),
        spec,
    ))
}
