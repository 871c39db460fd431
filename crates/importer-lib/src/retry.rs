//! Bounded exponential backoff for transient cluster errors

use crate::cluster::{object_ref, ClusterClient, ResourceKind};
use crate::error::{ClusterError, ImportError};
use crate::observability::ImporterMetrics;
use kube::api::DynamicObject;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least one is always made
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        std::cmp::min(self.initial_backoff.saturating_mul(factor), self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// Returns the last error together with the number of attempts made.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    metrics: &ImporterMetrics,
    what: &str,
    mut op: F,
) -> Result<T, (ClusterError, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation = %what,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient cluster error, retrying"
                );
                metrics.inc_apply_retries();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

/// Server-side apply with retries; failures surface as [`ImportError::Apply`]
pub async fn apply_with_retry(
    cluster: &dyn ClusterClient,
    kind: ResourceKind,
    obj: &DynamicObject,
    policy: &RetryPolicy,
    metrics: &ImporterMetrics,
) -> Result<DynamicObject, ImportError> {
    let (namespace, name) = object_ref(obj)?;
    let what = format!("apply {} {}/{}", kind, namespace, name);
    retry_transient(policy, metrics, &what, || cluster.apply(kind, obj))
        .await
        .map_err(|(source, attempts)| ImportError::Apply {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            attempts,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::Verb;
    use crate::cluster::MemoryCluster;

    fn service() -> DynamicObject {
        DynamicObject::new("weather-tool-mcp", &ResourceKind::Service.api_resource()).within("team1")
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
        assert_eq!(policy.backoff(40), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let cluster = MemoryCluster::new();
        cluster.fail_next(Verb::Apply, None, 503, 2);

        let applied = apply_with_retry(
            &cluster,
            ResourceKind::Service,
            &service(),
            &RetryPolicy::default(),
            &ImporterMetrics::new(),
        )
        .await
        .unwrap();
        assert_eq!(applied.metadata.name.as_deref(), Some("weather-tool-mcp"));
        assert_eq!(cluster.operations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let cluster = MemoryCluster::new();
        cluster.fail_next(Verb::Apply, None, 429, 10);

        let err = apply_with_retry(
            &cluster,
            ResourceKind::Service,
            &service(),
            &RetryPolicy::default(),
            &ImporterMetrics::new(),
        )
        .await
        .unwrap_err();
        match err {
            ImportError::Apply { attempts, ref source, .. } => {
                assert_eq!(attempts, 4);
                assert!(source.is_transient());
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.is_retry_safe());
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let cluster = MemoryCluster::new();
        cluster.fail_next(Verb::Apply, None, 403, 1);

        let err = apply_with_retry(
            &cluster,
            ResourceKind::Service,
            &service(),
            &RetryPolicy::default(),
            &ImporterMetrics::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::Apply { attempts: 1, .. }));
    }
}
