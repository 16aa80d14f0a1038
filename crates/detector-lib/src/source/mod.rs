//! Collaborators that feed the detector
//!
//! - [`InventorySource`] lists the running containers and their metadata
//! - [`MetricsSource`] returns per-container time series for a time range
//!
//! The Kubernetes and Prometheus adapters implement these for real
//! clusters; tests substitute in-memory fakes.

mod kubernetes;
mod promql;

pub use kubernetes::{parse_memory_bytes, KubeInventory};
pub use promql::PrometheusSource;

use crate::models::{ContainerIdentity, ContainerInfo};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure talking to a collaborator
#[derive(Debug, Error)]
pub enum SourceError {
    /// Worth retrying: timeouts, connection resets, 5xx responses
    #[error("transient source error: {0}")]
    Transient(String),

    /// Retrying will not help: bad query, auth failure, malformed payload
    #[error("source error: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Metric series the detector reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// CPU usage in cores
    Cpu,
    /// Working memory in bytes
    Memory,
    /// Bytes received plus transmitted per sample interval
    NetworkBytes,
    /// Outbound connection attempts per sample interval
    ConnectionAttempts,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::NetworkBytes => "network_bytes",
            MetricKind::ConnectionAttempts => "connection_attempts",
        };
        f.write_str(name)
    }
}

/// Inclusive range of Unix timestamps (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
    pub step_secs: u64,
}

/// A (timestamp, value) point
pub type Point = (i64, f64);

/// Lists running containers
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, SourceError>;
}

/// Range queries for one container's metric
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Points ordered by timestamp; an empty series is not an error
    async fn query_range(
        &self,
        container: &ContainerIdentity,
        metric: MetricKind,
        range: TimeRange,
    ) -> Result<Vec<Point>, SourceError>;
}

/// Bounded exponential backoff for transient collaborator failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(3)
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SourceError::Transient("timeout".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(3)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Transient("503".to_string()))
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(5)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Permanent("bad query".to_string()))
            })
            .await;

        assert!(!result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
