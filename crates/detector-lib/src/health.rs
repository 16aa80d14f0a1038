//! Liveness and readiness state for continuous mode
//!
//! The orchestrator records per-component status after every cycle; the
//! HTTP layer only reads it. The detector becomes ready once its first
//! cycle has finished, whatever the outcome.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    pub const INVENTORY: &str = "inventory";
    pub const METRICS_SOURCE: &str = "metrics_source";
    pub const DETECTOR: &str = "detector";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, but some containers could not be evaluated
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Summary of the latest finished cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastCycle {
    pub cycle: u64,
    pub finished_at: i64,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<LastCycle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    last_cycle: Option<LastCycle>,
}

/// Shared, cheaply cloneable health state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the detector's components as healthy
    pub async fn register_defaults(&self) {
        for name in [
            components::INVENTORY,
            components::METRICS_SOURCE,
            components::DETECTOR,
        ] {
            self.set_healthy(name).await;
        }
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        state
            .components
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Record a finished cycle; the first one makes the detector ready
    pub async fn record_cycle(&self, cycle: LastCycle) {
        self.state.write().await.last_cycle = Some(cycle);
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max_by_key(|s| match s {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy);

        HealthResponse {
            status,
            components: state.components.clone(),
            last_cycle: state.last_cycle.clone(),
        }
    }

    /// Ready after the first finished cycle
    ///
    /// A skipped cycle leaves the detector ready: it keeps serving the last
    /// report while the collaborators recover.
    pub async fn readiness(&self) -> ReadinessResponse {
        if self.state.read().await.last_cycle.is_some() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some("first detection cycle has not finished".to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.register_defaults().await;
        registry
            .set_degraded(components::METRICS_SOURCE, "2 containers failed")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::INVENTORY, "connection refused")
            .await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components[components::INVENTORY].message.as_deref(),
            Some("connection refused")
        );
    }

    #[tokio::test]
    async fn test_ready_after_first_cycle() {
        let registry = HealthRegistry::new();
        registry.register_defaults().await;
        registry
            .record_cycle(LastCycle {
                cycle: 1,
                finished_at: 1_700_000_000,
                outcome: "skipped".to_string(),
            })
            .await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
        assert_eq!(registry.health().await.last_cycle.unwrap().cycle, 1);
    }
}
