//! Error taxonomy of the importer
//!
//! `ValidationError` and `BuildFailure` are terminal for an import attempt.
//! `Timeout`, `Apply` and `Cluster` errors may be retried: every step of an
//! import is idempotent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A single problem with an import request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Malformed or inconsistent import request; never mutates the cluster
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid import request: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation::new(field, message)],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

/// Errors returned by a [`crate::cluster::ClusterClient`]
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("cluster API error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("resource serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cluster transport error: {0}")]
    Transport(String),
}

impl ClusterError {
    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        ClusterError::Api {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::api(404, "NotFound", format!("{} not found", what))
    }

    pub fn conflict(what: impl fmt::Display) -> Self {
        Self::api(409, "AlreadyExists", format!("{} already exists", what))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Api { code: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Api { code: 409, .. })
    }

    /// Errors worth retrying with backoff: conflicts, throttling, server
    /// errors and transport failures
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Api { code, .. } => *code == 409 || *code == 429 || *code >= 500,
            ClusterError::Transport(_) => true,
            ClusterError::Serialization(_) => false,
        }
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) => ClusterError::Api {
                code: ae.code,
                reason: ae.reason,
                message: ae.message,
            },
            kube::Error::SerdeError(e) => ClusterError::Serialization(e),
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

/// Errors surfaced by import, delete and status operations
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("build run {build_run} failed ({reason}): {message}")]
    BuildFailure {
        build_run: String,
        reason: String,
        message: String,
    },

    #[error("timed out after {}s waiting for {what}{}", .elapsed.as_secs(), if *.cancelled { " (cancelled)" } else { "" })]
    Timeout {
        what: String,
        elapsed: Duration,
        cancelled: bool,
    },

    #[error("failed to apply {kind} {namespace}/{name} after {attempts} attempt(s): {source}")]
    Apply {
        kind: String,
        namespace: String,
        name: String,
        attempts: u32,
        #[source]
        source: ClusterError,
    },

    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub type Result<T, E = ImportError> = std::result::Result<T, E>;

impl ImportError {
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        ImportError::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Whether re-running the same operation is safe and may succeed
    pub fn is_retry_safe(&self) -> bool {
        matches!(
            self,
            ImportError::Timeout { .. } | ImportError::Apply { .. } | ImportError::Cluster(_)
        )
    }

    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Validation(_) => "validation",
            ImportError::BuildFailure { .. } => "build_failure",
            ImportError::Timeout { .. } => "timeout",
            ImportError::Apply { .. } => "apply",
            ImportError::NotFound { .. } => "not_found",
            ImportError::Cluster(_) => "cluster",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClusterError::api(409, "Conflict", "x").is_transient());
        assert!(ClusterError::api(429, "TooManyRequests", "x").is_transient());
        assert!(ClusterError::api(503, "ServiceUnavailable", "x").is_transient());
        assert!(ClusterError::Transport("reset".into()).is_transient());
        assert!(!ClusterError::api(403, "Forbidden", "exceeded quota").is_transient());
        assert!(!ClusterError::api(422, "Invalid", "bad spec").is_transient());
    }

    #[test]
    fn test_retry_safety() {
        let timeout = ImportError::Timeout {
            what: "BuildRun team1/x".into(),
            elapsed: Duration::from_secs(10),
            cancelled: false,
        };
        assert!(timeout.is_retry_safe());
        assert_eq!(timeout.kind(), "timeout");

        let failure = ImportError::BuildFailure {
            build_run: "x-run-1".into(),
            reason: "BuildFailed".into(),
            message: "step-build exited 1".into(),
        };
        assert!(!failure.is_retry_safe());
        assert!(failure.to_string().contains("BuildFailed"));
        assert!(failure.to_string().contains("step-build exited 1"));

        let invalid = ImportError::from(ValidationError::single("name", "must not be empty"));
        assert!(!invalid.is_retry_safe());
        assert_eq!(invalid.to_string(), "invalid import request: name: must not be empty");
    }
}
