//! Observability for the detector
//!
//! Provides:
//! - Prometheus metrics (cycle latency, container counts, failures, store size)
//! - Structured event logging with tracing

use crate::models::{Classification, DetectionResult};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Cycle durations range from sub-second test clusters to multi-minute sweeps
const CYCLE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

static GLOBAL_METRICS: OnceLock<DetectorMetricsInner> = OnceLock::new();

struct DetectorMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles_total: IntCounterVec,
    containers_evaluated: IntGauge,
    containers_excluded: IntGauge,
    zombies: IntGauge,
    potential_zombies: IntGauge,
    fetch_errors: IntCounter,
    window_containers: IntGauge,
    window_samples: IntGauge,
    pattern_states: IntGauge,
}

impl DetectorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "zombie_detector_cycle_duration_seconds",
                "Wall time of one detection cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles_total: register_int_counter_vec!(
                "zombie_detector_cycles_total",
                "Detection cycles by outcome",
                &["outcome"]
            )
            .expect("Failed to register cycles_total"),

            containers_evaluated: register_int_gauge!(
                "zombie_detector_containers_evaluated",
                "Containers scored in the last cycle"
            )
            .expect("Failed to register containers_evaluated"),

            containers_excluded: register_int_gauge!(
                "zombie_detector_containers_excluded",
                "Containers skipped by policy in the last cycle"
            )
            .expect("Failed to register containers_excluded"),

            zombies: register_int_gauge!(
                "zombie_detector_zombies",
                "Containers classified as zombie in the last cycle"
            )
            .expect("Failed to register zombies"),

            potential_zombies: register_int_gauge!(
                "zombie_detector_potential_zombies",
                "Containers classified as potential zombie in the last cycle"
            )
            .expect("Failed to register potential_zombies"),

            fetch_errors: register_int_counter!(
                "zombie_detector_fetch_errors_total",
                "Per-container metric fetches that failed after retries"
            )
            .expect("Failed to register fetch_errors"),

            window_containers: register_int_gauge!(
                "zombie_detector_window_containers",
                "Containers with samples in the window store"
            )
            .expect("Failed to register window_containers"),

            window_samples: register_int_gauge!(
                "zombie_detector_window_samples",
                "Samples held in the window store"
            )
            .expect("Failed to register window_samples"),

            pattern_states: register_int_gauge!(
                "zombie_detector_pattern_states",
                "Tracked (container, rule) pattern states"
            )
            .expect("Failed to register pattern_states"),
        }
    }
}

/// Lightweight handle to the process-wide detector metrics
#[derive(Clone)]
pub struct DetectorMetrics {
    _private: (),
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DetectorMetricsInner {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new)
    }

    /// Record one finished cycle
    pub fn observe_cycle(&self, outcome: &str, duration_secs: f64) {
        let inner = self.inner();
        inner.cycle_duration_seconds.observe(duration_secs);
        inner.cycles_total.with_label_values(&[outcome]).inc();
    }

    /// Update per-cycle container counts from the verdicts
    pub fn set_cycle_counts(&self, results: &[DetectionResult], excluded: usize) {
        let inner = self.inner();
        let count = |c: Classification| results.iter().filter(|r| r.classification == c).count() as i64;
        inner.containers_evaluated.set(results.len() as i64);
        inner.containers_excluded.set(excluded as i64);
        inner.zombies.set(count(Classification::Zombie));
        inner.potential_zombies.set(count(Classification::PotentialZombie));
    }

    pub fn inc_fetch_errors(&self, n: u64) {
        self.inner().fetch_errors.inc_by(n);
    }

    pub fn set_store_size(&self, containers: usize, samples: usize, pattern_states: usize) {
        let inner = self.inner();
        inner.window_containers.set(containers as i64);
        inner.window_samples.set(samples as i64);
        inner.pattern_states.set(pattern_states as i64);
    }
}

/// Structured logger for detector events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "detector_started",
            cluster = %self.cluster,
            version = %version,
            mode = %mode,
            "Zombie detector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "detector_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Zombie detector shutting down"
        );
    }

    pub fn log_cycle_completed(
        &self,
        cycle: u64,
        evaluated: usize,
        excluded: usize,
        failed: usize,
        zombies: usize,
        potential_zombies: usize,
        duration_secs: f64,
    ) {
        info!(
            event = "cycle_completed",
            cluster = %self.cluster,
            cycle = cycle,
            evaluated = evaluated,
            excluded = excluded,
            failed = failed,
            zombies = zombies,
            potential_zombies = potential_zombies,
            duration_secs = duration_secs,
            "Detection cycle completed"
        );
    }

    pub fn log_cycle_failed(&self, cycle: u64, error: &str) {
        error!(
            event = "cycle_failed",
            cluster = %self.cluster,
            cycle = cycle,
            error = %error,
            "Detection cycle skipped"
        );
    }

    /// Log a container scored at or above the potential-zombie threshold
    pub fn log_detection(&self, result: &DetectionResult) {
        let triggered: Vec<&str> = result
            .rules
            .iter()
            .filter(|r| r.triggered)
            .map(|r| r.rule.as_str())
            .collect();
        let id = &result.container;

        match result.classification {
            Classification::Zombie => warn!(
                event = "zombie_detected",
                cluster = %self.cluster,
                namespace = %id.namespace,
                pod_name = %id.pod_name,
                container = %id.container_name,
                node = ?result.node_name,
                score = result.score,
                classification = %result.classification,
                triggered_rules = ?triggered,
                "Zombie container detected"
            ),
            Classification::PotentialZombie => info!(
                event = "zombie_detected",
                cluster = %self.cluster,
                namespace = %id.namespace,
                pod_name = %id.pod_name,
                container = %id.container_name,
                node = ?result.node_name,
                score = result.score,
                classification = %result.classification,
                triggered_rules = ?triggered,
                "Potential zombie container detected"
            ),
            Classification::Normal => {}
        }
    }

    pub fn log_classification_change(
        &self,
        container: &str,
        previous: Classification,
        current: Classification,
        score: f64,
    ) {
        info!(
            event = "classification_changed",
            cluster = %self.cluster,
            container = %container,
            previous = %previous,
            current = %current,
            score = score,
            "Container classification changed"
        );
    }
}
