//! Structural validation of import requests
//!
//! Every check runs and all violations are reported together, so a caller
//! can fix a request in one round trip.

use crate::error::{ValidationError, Violation};
use crate::labels::TOOL_SERVICE_SUFFIX;
use crate::models::{DeploymentMethod, EnvVar, ImportRequest, WorkloadKind, WorkloadType};
use std::collections::HashSet;

const MAX_DNS_LABEL: usize = 63;
const MAX_PORT_NAME: usize = 15;
const MAX_IMAGE_TAG: usize = 128;
const PORT_PROTOCOLS: &[&str] = &["TCP", "UDP", "SCTP"];

pub fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_DNS_LABEL
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

/// Kubernetes label value: empty, or alphanumeric at both ends with `-_.` inside
pub fn is_label_value(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return true;
    }
    bytes.len() <= MAX_DNS_LABEL
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}

/// `^[A-Za-z_][A-Za-z0-9_]*$`
pub fn is_env_name(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_image_tag(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_IMAGE_TAG
        && (bytes[0].is_ascii_alphanumeric() || bytes[0] == b'_')
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
}

/// Parses durations such as `15m`, `90s` or `1h30m` into seconds
pub fn parse_duration_secs(value: &str) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: u64 = digits.parse().ok()?;
        digits.clear();
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = total.checked_add(amount.checked_mul(unit)?)?;
    }
    if digits.is_empty() {
        Some(total)
    } else {
        None
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

struct Checker {
    violations: Vec<Violation>,
}

impl Checker {
    fn fail(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.violations.push(Violation::new(field, message));
    }

    fn require_absent(&mut self, field: &str, value: bool, method: DeploymentMethod) {
        if value {
            self.fail(
                field,
                format!("must not be set when deploymentMethod is {}", method.as_str()),
            );
        }
    }
}

pub fn validate(req: &ImportRequest) -> Result<(), ValidationError> {
    let mut check = Checker {
        violations: Vec::new(),
    };

    check_names(&mut check, req);
    check_method_fields(&mut check, req);

    if req.kind == WorkloadKind::Tool && req.workload_type == WorkloadType::Job {
        check.fail("workloadType", "tools must run as a deployment or statefulset");
    }

    check_ports(&mut check, req);
    check_env(&mut check, &req.env_vars);

    for protocol in &req.protocol_labels {
        if !is_dns_label(protocol) {
            check.fail(
                "protocolLabels",
                format!("'{}' must be a lowercase DNS label", protocol),
            );
        }
    }
    if let Some(framework) = &req.framework {
        if !is_label_value(framework) {
            check.fail("framework", format!("'{}' is not a valid label value", framework));
        }
    }

    if check.violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            violations: check.violations,
        })
    }
}

fn check_names(check: &mut Checker, req: &ImportRequest) {
    if !is_dns_label(&req.name) {
        check.fail(
            "name",
            format!(
                "'{}' must be a DNS-1123 label: lowercase alphanumerics and '-', at most {} characters",
                req.name, MAX_DNS_LABEL
            ),
        );
    } else if req.kind == WorkloadKind::Tool
        && req.name.len() + TOOL_SERVICE_SUFFIX.len() > MAX_DNS_LABEL
    {
        check.fail(
            "name",
            format!(
                "tool names are limited to {} characters so the '{}' Service name fits",
                MAX_DNS_LABEL - TOOL_SERVICE_SUFFIX.len(),
                TOOL_SERVICE_SUFFIX
            ),
        );
    }
    if !is_dns_label(&req.namespace) {
        check.fail("namespace", format!("'{}' must be a DNS-1123 label", req.namespace));
    }
}

fn check_method_fields(check: &mut Checker, req: &ImportRequest) {
    let method = req.deployment_method;
    match method {
        DeploymentMethod::Source => {
            match req.git_url.as_deref().map(str::trim) {
                None | Some("") => check.fail("gitUrl", "required when deploymentMethod is source"),
                Some(url)
                    if !(url.starts_with("https://")
                        || url.starts_with("http://")
                        || url.starts_with("ssh://")
                        || url.starts_with("git@")) =>
                {
                    check.fail("gitUrl", format!("'{}' is not a git URL", url));
                }
                Some(_) => {}
            }
            check.require_absent("image", present(&req.image), method);
            check.require_absent("imagePullSecret", present(&req.image_pull_secret), method);

            if let Some(tag) = &req.image_tag {
                if !is_image_tag(tag) {
                    check.fail("imageTag", format!("'{}' is not a valid image tag", tag));
                }
            }
            if let Some(timeout) = req.build_config.as_ref().and_then(|b| b.timeout.as_deref()) {
                if parse_duration_secs(timeout).filter(|s| *s > 0).is_none() {
                    check.fail(
                        "buildConfig.timeout",
                        format!("'{}' is not a duration such as 15m or 1h30m", timeout),
                    );
                }
            }
        }
        DeploymentMethod::Image => {
            match req.image.as_deref().map(str::trim) {
                None | Some("") => check.fail("image", "required when deploymentMethod is image"),
                Some(image) if image.chars().any(char::is_whitespace) => {
                    check.fail("image", "must not contain whitespace");
                }
                Some(_) => {}
            }
            check.require_absent("gitUrl", present(&req.git_url), method);
            check.require_absent("gitRevision", present(&req.git_revision), method);
            check.require_absent("contextDir", present(&req.context_dir), method);
            check.require_absent("registry", present(&req.registry), method);
            check.require_absent("imageTag", present(&req.image_tag), method);
            check.require_absent("pushSecret", present(&req.push_secret), method);
            check.require_absent("cloneSecret", present(&req.clone_secret), method);
            check.require_absent("buildConfig", req.build_config.is_some(), method);
        }
    }
}

fn check_ports(check: &mut Checker, req: &ImportRequest) {
    let mut ports = HashSet::new();
    let mut names = HashSet::new();
    for (i, port) in req.service_ports.iter().enumerate() {
        let field = format!("servicePorts[{}]", i);
        if !(1..=65535).contains(&port.port) {
            check.fail(&field, format!("port {} is out of range 1-65535", port.port));
        }
        if !(1..=65535).contains(&port.target_port) {
            check.fail(&field, format!("targetPort {} is out of range 1-65535", port.target_port));
        }
        if !ports.insert(port.port) {
            check.fail(&field, format!("duplicate port {}", port.port));
        }
        if !is_dns_label(&port.name) || port.name.len() > MAX_PORT_NAME {
            check.fail(
                &field,
                format!("port name '{}' must be a DNS label of at most {} characters", port.name, MAX_PORT_NAME),
            );
        } else if !names.insert(port.name.as_str()) {
            check.fail(&field, format!("duplicate port name '{}'", port.name));
        }
        if !PORT_PROTOCOLS.contains(&port.protocol.as_str()) {
            check.fail(&field, format!("protocol '{}' must be TCP, UDP or SCTP", port.protocol));
        }
    }
}

fn check_env(check: &mut Checker, env_vars: &[EnvVar]) {
    let mut seen = HashSet::new();
    for (i, var) in env_vars.iter().enumerate() {
        let field = format!("envVars[{}]", i);
        if !is_env_name(&var.name) {
            check.fail(&field, format!("'{}' is not a valid environment variable name", var.name));
        }
        if !seen.insert(var.name.as_str()) {
            check.fail(&field, format!("duplicate environment variable '{}'", var.name));
        }
        let refs = var
            .value_from
            .as_ref()
            .map(|src| {
                usize::from(src.secret_key_ref.is_some())
                    + usize::from(src.config_map_key_ref.is_some())
            })
            .unwrap_or(0);
        let sources = usize::from(var.value.is_some()) + refs;
        if sources != 1 {
            check.fail(
                &field,
                format!(
                    "'{}' must have exactly one of value, secretKeyRef or configMapKeyRef",
                    var.name
                ),
            );
        }
    }
}
