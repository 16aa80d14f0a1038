//! Core data models for the zombie detector

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable key for all per-container state
///
/// A restarted container that comes back with a new UID is a different
/// identity, so its windows and pattern state start from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ContainerIdentity {
    pub fn new(
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        container_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod_name: pod_name.into(),
            container_name: container_name.into(),
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }
}

impl fmt::Display for ContainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.pod_name, self.container_name
        )
    }
}

/// A single metric observation for one container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Unix timestamp in seconds
    pub timestamp: i64,
    /// CPU utilization as a fraction of one core (0.05 = 5%)
    pub cpu_fraction: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: Option<u64>,
    /// Bytes received plus transmitted since the previous sample
    pub network_bytes: u64,
    /// Outbound connection attempts since the previous sample
    pub connection_attempts: u32,
}

impl MetricSample {
    /// Memory usage as a fraction of the limit, when a limit is known
    pub fn memory_limit_fraction(&self) -> Option<f64> {
        match self.memory_limit_bytes {
            Some(limit) if limit > 0 => Some(self.memory_used_bytes as f64 / limit as f64),
            _ => None,
        }
    }
}

/// Container metadata from the inventory collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub identity: ContainerIdentity,
    pub node_name: Option<String>,
    /// Unix timestamp (seconds) the container started
    pub created_at: i64,
    /// Labels carried by the owning pod
    #[serde(default)]
    pub pod_labels: BTreeMap<String, String>,
    /// Labels attached to the container itself by the runtime
    #[serde(default)]
    pub container_labels: BTreeMap<String, String>,
    /// Kind of the pod's controlling owner (e.g. `ReplicaSet`, `Job`)
    pub owner_kind: Option<String>,
    pub memory_limit_bytes: Option<u64>,
}

impl ContainerInfo {
    pub fn new(identity: ContainerIdentity, created_at: i64) -> Self {
        Self {
            identity,
            node_name: None,
            created_at,
            pod_labels: BTreeMap::new(),
            container_labels: BTreeMap::new(),
            owner_kind: None,
            memory_limit_bytes: None,
        }
    }

    /// Age in seconds relative to `now`
    pub fn age_secs(&self, now: i64) -> i64 {
        now - self.created_at
    }
}

/// Identifier for the five fixed heuristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    SustainedLowCpu,
    MemoryLeak,
    StuckProcess,
    NetworkTimeout,
    ResourceImbalance,
}

impl RuleId {
    /// All rules in evaluation and reporting order
    pub const ALL: [RuleId; 5] = [
        RuleId::SustainedLowCpu,
        RuleId::MemoryLeak,
        RuleId::StuckProcess,
        RuleId::NetworkTimeout,
        RuleId::ResourceImbalance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::SustainedLowCpu => "sustained_low_cpu",
            RuleId::MemoryLeak => "memory_leak",
            RuleId::StuckProcess => "stuck_process",
            RuleId::NetworkTimeout => "network_timeout",
            RuleId::ResourceImbalance => "resource_imbalance",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one rule evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule: RuleId,
    /// Score in [0, 1]
    pub score: f64,
    pub triggered: bool,
    /// Whether the rule scored this container. Only the low-CPU baseline
    /// reports a clear result; the other rules abstain when their pattern
    /// is absent. Abstaining rules are left out of the weight
    /// normalisation in the aggregator.
    pub applicable: bool,
    /// Raw evidence values that produced the score
    pub evidence: BTreeMap<String, f64>,
    /// Human-readable note when the rule did not score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Points this rule added to the final score, filled in by the aggregator
    #[serde(default)]
    pub contribution: f64,
}

impl RuleResult {
    /// A rule that looked at the data and found nothing
    pub fn clear(rule: RuleId) -> Self {
        Self {
            rule,
            score: 0.0,
            triggered: false,
            applicable: true,
            evidence: BTreeMap::new(),
            reason: None,
            contribution: 0.0,
        }
    }

    /// A rule that has nothing to say about this container
    pub fn abstain(rule: RuleId, reason: impl Into<String>) -> Self {
        Self {
            applicable: false,
            reason: Some(reason.into()),
            ..Self::clear(rule)
        }
    }

    /// A triggered rule with the given score, clamped into [0, 1]
    pub fn triggered(rule: RuleId, score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            triggered: true,
            ..Self::clear(rule)
        }
    }

    pub fn with_evidence(mut self, key: &str, value: f64) -> Self {
        self.evidence.insert(key.to_string(), value);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Final classification bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    PotentialZombie,
    Zombie,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Normal => write!(f, "normal"),
            Classification::PotentialZombie => write!(f, "potential_zombie"),
            Classification::Zombie => write!(f, "zombie"),
        }
    }
}

/// Per-container verdict for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub container: ContainerIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Score in [0, 100]
    pub score: f64,
    pub classification: Classification,
    pub rules: Vec<RuleResult>,
    /// Unix timestamp (seconds) of the evaluation
    pub evaluated_at: i64,
}

impl DetectionResult {
    pub fn rule(&self, rule: RuleId) -> Option<&RuleResult> {
        self.rules.iter().find(|r| r.rule == rule)
    }

    pub fn is_suspect(&self) -> bool {
        self.classification != Classification::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display_and_uid_distinguishes() {
        let a = ContainerIdentity::new("default", "web-1", "app");
        let b = a.clone().with_uid("abc");

        assert_eq!(a.to_string(), "default/web-1/app");
        assert_ne!(a, b);
    }

    #[test]
    fn test_memory_limit_fraction() {
        let sample = MetricSample {
            timestamp: 0,
            cpu_fraction: 0.0,
            memory_used_bytes: 50,
            memory_limit_bytes: Some(1000),
            network_bytes: 0,
            connection_attempts: 0,
        };
        assert!((sample.memory_limit_fraction().unwrap() - 0.05).abs() < 1e-12);

        let unlimited = MetricSample {
            memory_limit_bytes: Some(0),
            ..sample
        };
        assert!(unlimited.memory_limit_fraction().is_none());
    }

    #[test]
    fn test_rule_result_triggered_clamps() {
        let result = RuleResult::triggered(RuleId::MemoryLeak, 1.7);
        assert_eq!(result.score, 1.0);
        assert!(result.triggered);
        assert!(result.applicable);
    }

    #[test]
    fn test_classification_serializes_snake_case() {
        let json = serde_json::to_string(&Classification::PotentialZombie).unwrap();
        assert_eq!(json, "\"potential_zombie\"");
    }
}
