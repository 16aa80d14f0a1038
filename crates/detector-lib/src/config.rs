//! Detector configuration
//!
//! Every threshold and weight used by the rules and the aggregator lives
//! here so operators can tune sensitivity without rebuilding. Values are
//! layered: built-in defaults, an optional config file, then `ZOMBIE_*`
//! environment variables (`__` separates nested keys, e.g.
//! `ZOMBIE_SCORING__ZOMBIE_THRESHOLD=75`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Tolerance when checking that the rule weights sum to one
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Fatal configuration problems, reported before the first cycle runs
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("rule weights must sum to 1.0, got {sum}")]
    WeightSum { sum: f64 },

    #[error("weight for rule {rule} must be within [0, 1], got {value}")]
    InvalidWeight { rule: &'static str, value: f64 },

    #[error(
        "classification thresholds must satisfy 0 <= potential ({potential}) < zombie ({zombie}) <= 100"
    )]
    Thresholds { potential: f64, zombie: f64 },

    #[error("{field} must be within {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("invalid namespace name {0:?}: must be a lowercase RFC 1123 label")]
    InvalidNamespace(String),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level detector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub windows: WindowConfig,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub exclusion: ExclusionConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Metrics collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,
    /// How far back to backfill a container seen for the first time
    #[serde(default = "default_analysis_duration_mins")]
    pub analysis_duration_mins: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub queries: QueryTemplates,
}

/// PromQL templates per metric kind
///
/// `{namespace}`, `{pod}`, `{container}` and `{step}` are substituted
/// before the query is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTemplates {
    #[serde(default = "default_cpu_query")]
    pub cpu: String,
    #[serde(default = "default_memory_query")]
    pub memory: String,
    #[serde(default = "default_network_bytes_query")]
    pub network_bytes: String,
    #[serde(default = "default_connection_attempts_query")]
    pub connection_attempts: String,
}

/// Sampling cadence and coverage policy for the window store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Nominal collection cadence of the metrics source
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Fraction of the expected sample count a window needs before rules score it
    #[serde(default = "default_min_coverage")]
    pub min_coverage: f64,
}

/// Thresholds for the five heuristics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub sustained_low_cpu: LowCpuRuleConfig,
    #[serde(default)]
    pub memory_leak: MemoryLeakRuleConfig,
    #[serde(default)]
    pub stuck_process: StuckProcessRuleConfig,
    #[serde(default)]
    pub network_timeout: NetworkTimeoutRuleConfig,
    #[serde(default)]
    pub resource_imbalance: ResourceImbalanceRuleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowCpuRuleConfig {
    /// Mean CPU fraction below which the rule starts to score
    #[serde(default = "default_low_cpu_threshold")]
    pub cpu_threshold: f64,
    /// CPU fraction at or below which the score saturates at 1
    #[serde(default = "default_idle_cpu_floor")]
    pub idle_cpu_floor: f64,
    /// Network rate considered negligible
    #[serde(default = "default_network_floor")]
    pub network_floor_bytes_per_sec: f64,
    /// Relative memory drop over the window still treated as flat
    #[serde(default = "default_memory_decrease_tolerance")]
    pub memory_decrease_tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLeakRuleConfig {
    #[serde(default = "default_leak_cpu_threshold")]
    pub cpu_threshold: f64,
    /// Minimum relative memory growth over the window
    #[serde(default = "default_growth_floor")]
    pub growth_floor: f64,
    /// Relative growth of the network activity proxy that explains the memory growth
    #[serde(default = "default_activity_growth_tolerance")]
    pub activity_growth_tolerance: f64,
    /// Absolute activity increase below which the proxy is treated as flat
    #[serde(default = "default_activity_floor")]
    pub activity_floor_bytes_per_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckProcessRuleConfig {
    #[serde(default = "default_spike_threshold")]
    pub spike_threshold: f64,
    /// A spike must be shorter than this
    #[serde(default = "default_spike_max_duration_secs")]
    pub spike_max_duration_secs: u64,
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold: f64,
    /// The idle run after a spike must be longer than this
    #[serde(default = "default_idle_min_duration_secs")]
    pub idle_min_duration_secs: u64,
    #[serde(default = "default_min_repetitions")]
    pub min_repetitions: u32,
    /// Repetitions older than this no longer count
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTimeoutRuleConfig {
    #[serde(default = "default_low_cpu_threshold")]
    pub cpu_threshold: f64,
    #[serde(default = "default_min_attempt_interval_secs")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_attempt_interval_secs")]
    pub max_interval_secs: u64,
    #[serde(default = "default_max_bytes_per_attempt")]
    pub max_bytes_per_attempt: f64,
    #[serde(default = "default_min_attempts")]
    pub min_attempts: usize,
    /// Largest coefficient of variation of the inter-attempt interval still considered periodic
    #[serde(default = "default_max_interval_cv")]
    pub max_interval_cv: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceImbalanceRuleConfig {
    #[serde(default = "default_min_memory_limit_bytes")]
    pub min_memory_limit_bytes: u64,
    #[serde(default = "default_memory_usage_ceiling")]
    pub memory_usage_ceiling: f64,
    #[serde(default = "default_imbalance_cpu_ceiling")]
    pub cpu_ceiling: f64,
}

/// Weighted-score fusion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: RuleWeights,
    #[serde(default = "default_zombie_threshold")]
    pub zombie_threshold: f64,
    #[serde(default = "default_potential_zombie_threshold")]
    pub potential_zombie_threshold: f64,
    /// Normalise the weighted sum over the rules that did not abstain
    #[serde(default = "default_true")]
    pub renormalize_abstentions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleWeights {
    #[serde(default = "default_weight_low_cpu")]
    pub sustained_low_cpu: f64,
    #[serde(default = "default_weight_memory_leak")]
    pub memory_leak: f64,
    #[serde(default = "default_weight_stuck_process")]
    pub stuck_process: f64,
    #[serde(default = "default_weight_network_timeout")]
    pub network_timeout: f64,
    #[serde(default = "default_weight_resource_imbalance")]
    pub resource_imbalance: f64,
}

/// Which containers never reach the rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionConfig {
    #[serde(default = "default_excluded_namespaces")]
    pub namespaces: Vec<String>,
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
    #[serde(default = "default_exclusion_label")]
    pub label_key: String,
    /// Exact, case-sensitive value of `label_key` that opts a container out
    #[serde(default = "default_exclusion_label_value")]
    pub label_value: String,
    #[serde(default)]
    pub exclude_batch_jobs: bool,
    #[serde(default = "default_batch_owner_kinds")]
    pub batch_owner_kinds: Vec<String>,
}

/// Cycle scheduling and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub continuous: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on one cycle in continuous mode; defaults to the interval
    #[serde(default)]
    pub cycle_timeout_secs: Option<u64>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Concurrent metric fetches per cycle
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// Cycle summaries kept for continuous-mode diffing
    #[serde(default = "default_history_cycles")]
    pub history_cycles: usize,
}

fn default_prometheus_url() -> String {
    "http://prometheus.monitoring:9090".to_string()
}
fn default_analysis_duration_mins() -> u64 {
    60
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_cpu_query() -> String {
    r#"sum(rate(container_cpu_usage_seconds_total{namespace="{namespace}",pod="{pod}",container="{container}"}[1m]))"#.to_string()
}
fn default_memory_query() -> String {
    r#"sum(container_memory_usage_bytes{namespace="{namespace}",pod="{pod}",container="{container}"})"#.to_string()
}
fn default_network_bytes_query() -> String {
    r#"sum(rate(container_network_receive_bytes_total{namespace="{namespace}",pod="{pod}"}[1m]) + rate(container_network_transmit_bytes_total{namespace="{namespace}",pod="{pod}"}[1m])) * {step}"#.to_string()
}
fn default_connection_attempts_query() -> String {
    r#"sum(rate(container_network_transmit_packets_total{namespace="{namespace}",pod="{pod}"}[1m])) * {step}"#.to_string()
}
fn default_sample_interval_secs() -> u64 {
    15
}
fn default_min_coverage() -> f64 {
    0.5
}
fn default_low_cpu_threshold() -> f64 {
    0.05
}
fn default_idle_cpu_floor() -> f64 {
    0.005
}
fn default_network_floor() -> f64 {
    1000.0
}
fn default_memory_decrease_tolerance() -> f64 {
    0.01
}
fn default_leak_cpu_threshold() -> f64 {
    0.03
}
fn default_growth_floor() -> f64 {
    0.05
}
fn default_activity_growth_tolerance() -> f64 {
    0.05
}
fn default_activity_floor() -> f64 {
    100.0
}
fn default_spike_threshold() -> f64 {
    0.5
}
fn default_spike_max_duration_secs() -> u64 {
    30
}
fn default_idle_threshold() -> f64 {
    0.02
}
fn default_idle_min_duration_secs() -> u64 {
    15 * 60
}
fn default_min_repetitions() -> u32 {
    3
}
fn default_lookback_secs() -> u64 {
    60 * 60
}
fn default_min_attempt_interval_secs() -> u64 {
    60
}
fn default_max_attempt_interval_secs() -> u64 {
    5 * 60
}
fn default_max_bytes_per_attempt() -> f64 {
    1024.0
}
fn default_min_attempts() -> usize {
    3
}
fn default_max_interval_cv() -> f64 {
    0.5
}
fn default_min_memory_limit_bytes() -> u64 {
    500 * 1024 * 1024
}
fn default_memory_usage_ceiling() -> f64 {
    0.10
}
fn default_imbalance_cpu_ceiling() -> f64 {
    0.01
}
fn default_zombie_threshold() -> f64 {
    70.0
}
fn default_potential_zombie_threshold() -> f64 {
    40.0
}
fn default_true() -> bool {
    true
}
fn default_weight_low_cpu() -> f64 {
    0.35
}
fn default_weight_memory_leak() -> f64 {
    0.25
}
fn default_weight_stuck_process() -> f64 {
    0.15
}
fn default_weight_network_timeout() -> f64 {
    0.15
}
fn default_weight_resource_imbalance() -> f64 {
    0.10
}
fn default_excluded_namespaces() -> Vec<String> {
    ["kube-system", "kube-public", "kube-node-lease", "monitoring"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_min_age_secs() -> u64 {
    10 * 60
}
fn default_exclusion_label() -> String {
    "zombie-detection.exclude".to_string()
}
fn default_exclusion_label_value() -> String {
    "true".to_string()
}
fn default_batch_owner_kinds() -> Vec<String> {
    vec!["Job".to_string(), "CronJob".to_string()]
}
fn default_interval_secs() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_fetch_concurrency() -> usize {
    8
}
fn default_history_cycles() -> usize {
    5
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            prometheus_url: default_prometheus_url(),
            analysis_duration_mins: default_analysis_duration_mins(),
            request_timeout_secs: default_request_timeout_secs(),
            queries: QueryTemplates::default(),
        }
    }
}

impl Default for QueryTemplates {
    fn default() -> Self {
        Self {
            cpu: default_cpu_query(),
            memory: default_memory_query(),
            network_bytes: default_network_bytes_query(),
            connection_attempts: default_connection_attempts_query(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            min_coverage: default_min_coverage(),
        }
    }
}

impl Default for LowCpuRuleConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: default_low_cpu_threshold(),
            idle_cpu_floor: default_idle_cpu_floor(),
            network_floor_bytes_per_sec: default_network_floor(),
            memory_decrease_tolerance: default_memory_decrease_tolerance(),
        }
    }
}

impl Default for MemoryLeakRuleConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: default_leak_cpu_threshold(),
            growth_floor: default_growth_floor(),
            activity_growth_tolerance: default_activity_growth_tolerance(),
            activity_floor_bytes_per_sec: default_activity_floor(),
        }
    }
}

impl Default for StuckProcessRuleConfig {
    fn default() -> Self {
        Self {
            spike_threshold: default_spike_threshold(),
            spike_max_duration_secs: default_spike_max_duration_secs(),
            idle_threshold: default_idle_threshold(),
            idle_min_duration_secs: default_idle_min_duration_secs(),
            min_repetitions: default_min_repetitions(),
            lookback_secs: default_lookback_secs(),
        }
    }
}

impl Default for NetworkTimeoutRuleConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: default_low_cpu_threshold(),
            min_interval_secs: default_min_attempt_interval_secs(),
            max_interval_secs: default_max_attempt_interval_secs(),
            max_bytes_per_attempt: default_max_bytes_per_attempt(),
            min_attempts: default_min_attempts(),
            max_interval_cv: default_max_interval_cv(),
        }
    }
}

impl Default for ResourceImbalanceRuleConfig {
    fn default() -> Self {
        Self {
            min_memory_limit_bytes: default_min_memory_limit_bytes(),
            memory_usage_ceiling: default_memory_usage_ceiling(),
            cpu_ceiling: default_imbalance_cpu_ceiling(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: RuleWeights::default(),
            zombie_threshold: default_zombie_threshold(),
            potential_zombie_threshold: default_potential_zombie_threshold(),
            renormalize_abstentions: true,
        }
    }
}

impl Default for RuleWeights {
    fn default() -> Self {
        Self {
            sustained_low_cpu: default_weight_low_cpu(),
            memory_leak: default_weight_memory_leak(),
            stuck_process: default_weight_stuck_process(),
            network_timeout: default_weight_network_timeout(),
            resource_imbalance: default_weight_resource_imbalance(),
        }
    }
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            namespaces: default_excluded_namespaces(),
            min_age_secs: default_min_age_secs(),
            label_key: default_exclusion_label(),
            label_value: default_exclusion_label_value(),
            exclude_batch_jobs: false,
            batch_owner_kinds: default_batch_owner_kinds(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            continuous: false,
            interval_secs: default_interval_secs(),
            cycle_timeout_secs: None,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            fetch_concurrency: default_fetch_concurrency(),
            history_cycles: default_history_cycles(),
        }
    }
}

impl RuleWeights {
    /// Weights paired with their rule names, in rule order
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("sustained_low_cpu", self.sustained_low_cpu),
            ("memory_leak", self.memory_leak),
            ("stuck_process", self.stuck_process),
            ("network_timeout", self.network_timeout),
            ("resource_imbalance", self.resource_imbalance),
        ]
    }

    pub fn sum(&self) -> f64 {
        self.entries().iter().map(|(_, w)| w).sum()
    }

    /// Reject weights outside [0, 1] or not summing to one
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (rule, value) in self.entries() {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidWeight { rule, value });
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum { sum });
        }
        Ok(())
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        let (potential, zombie) = (self.potential_zombie_threshold, self.zombie_threshold);
        if !(0.0..=100.0).contains(&potential)
            || !(0.0..=100.0).contains(&zombie)
            || potential >= zombie
        {
            return Err(ConfigError::Thresholds { potential, zombie });
        }
        Ok(())
    }
}

impl OrchestratorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs.unwrap_or(self.interval_secs))
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl DetectorConfig {
    /// Load defaults, an optional file and `ZOMBIE_*` environment overrides
    ///
    /// The result is not validated; callers apply command-line overrides
    /// first and then call [`DetectorConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ZOMBIE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("exclusion.namespaces")
                .with_list_parse_key("exclusion.batch_owner_kinds")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Check every value the engine relies on; fails on the first problem
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;

        if self.windows.sample_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "windows.sample_interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        check_fraction("windows.min_coverage", self.windows.min_coverage)?;

        let low = &self.rules.sustained_low_cpu;
        check_fraction("rules.sustained_low_cpu.cpu_threshold", low.cpu_threshold)?;
        if !(0.0..low.cpu_threshold).contains(&low.idle_cpu_floor) {
            return Err(ConfigError::OutOfRange {
                field: "rules.sustained_low_cpu.idle_cpu_floor",
                range: "[0, cpu_threshold)",
                value: low.idle_cpu_floor,
            });
        }
        check_non_negative(
            "rules.sustained_low_cpu.network_floor_bytes_per_sec",
            low.network_floor_bytes_per_sec,
        )?;
        check_unit("rules.sustained_low_cpu.memory_decrease_tolerance", low.memory_decrease_tolerance)?;

        let leak = &self.rules.memory_leak;
        check_fraction("rules.memory_leak.cpu_threshold", leak.cpu_threshold)?;
        check_fraction("rules.memory_leak.growth_floor", leak.growth_floor)?;
        check_non_negative(
            "rules.memory_leak.activity_growth_tolerance",
            leak.activity_growth_tolerance,
        )?;
        check_non_negative(
            "rules.memory_leak.activity_floor_bytes_per_sec",
            leak.activity_floor_bytes_per_sec,
        )?;

        let stuck = &self.rules.stuck_process;
        check_fraction("rules.stuck_process.spike_threshold", stuck.spike_threshold)?;
        check_fraction("rules.stuck_process.idle_threshold", stuck.idle_threshold)?;
        if stuck.idle_threshold >= stuck.spike_threshold {
            return Err(ConfigError::Invalid {
                field: "rules.stuck_process.idle_threshold",
                reason: "must be below spike_threshold".to_string(),
            });
        }
        if stuck.min_repetitions == 0 || stuck.lookback_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "rules.stuck_process",
                reason: "min_repetitions and lookback_secs must be positive".to_string(),
            });
        }

        let net = &self.rules.network_timeout;
        check_fraction("rules.network_timeout.cpu_threshold", net.cpu_threshold)?;
        if net.min_interval_secs == 0 || net.min_interval_secs > net.max_interval_secs {
            return Err(ConfigError::Invalid {
                field: "rules.network_timeout",
                reason: "need 0 < min_interval_secs <= max_interval_secs".to_string(),
            });
        }
        if net.max_bytes_per_attempt <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "rules.network_timeout.max_bytes_per_attempt",
                range: "(0, inf)",
                value: net.max_bytes_per_attempt,
            });
        }
        if net.min_attempts < 2 {
            return Err(ConfigError::Invalid {
                field: "rules.network_timeout.min_attempts",
                reason: "at least two attempts are needed to measure an interval".to_string(),
            });
        }
        check_non_negative("rules.network_timeout.max_interval_cv", net.max_interval_cv)?;

        let imbalance = &self.rules.resource_imbalance;
        check_fraction(
            "rules.resource_imbalance.memory_usage_ceiling",
            imbalance.memory_usage_ceiling,
        )?;
        check_fraction("rules.resource_imbalance.cpu_ceiling", imbalance.cpu_ceiling)?;

        for namespace in &self.exclusion.namespaces {
            if !is_valid_namespace(namespace) {
                return Err(ConfigError::InvalidNamespace(namespace.clone()));
            }
        }
        if self.exclusion.label_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "exclusion.label_key",
                reason: "must not be empty".to_string(),
            });
        }

        let orch = &self.orchestrator;
        if orch.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "orchestrator.interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        if orch.cycle_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "orchestrator.cycle_timeout_secs",
                reason: "must be positive".to_string(),
            });
        }
        if orch.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "orchestrator.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if orch.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "orchestrator.fetch_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if orch.initial_backoff_ms > orch.max_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "orchestrator.initial_backoff_ms",
                reason: "must not exceed max_backoff_ms".to_string(),
            });
        }

        if self.source.analysis_duration_mins == 0 {
            return Err(ConfigError::Invalid {
                field: "source.analysis_duration_mins",
                reason: "must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// (0, 1]
fn check_fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            range: "(0, 1]",
            value,
        })
    }
}

/// [0, 1]
fn check_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            range: "[0, 1]",
            value,
        })
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            range: "[0, inf)",
            value,
        })
    }
}

/// RFC 1123 label, the syntax Kubernetes accepts for namespace names
pub fn is_valid_namespace(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes.iter().all(|&b| edge_ok(b) || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.scoring.weights.sum() - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
        assert_eq!(config.orchestrator.interval(), Duration::from_secs(300));
        assert_eq!(config.exclusion.min_age_secs, 600);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = DetectorConfig::default();
        config.scoring.weights.sustained_low_cpu = 0.40;

        match config.validate() {
            Err(ConfigError::WeightSum { sum }) => assert!((sum - 1.05).abs() < 1e-9),
            other => panic!("expected weight sum error, got {:?}", other),
        }
    }

    #[test]
    fn test_weight_sum_within_tolerance_accepted() {
        let mut config = DetectorConfig::default();
        config.scoring.weights.resource_imbalance = 0.10 + 1e-12;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = DetectorConfig::default();
        config.scoring.weights.memory_leak = -0.25;
        config.scoring.weights.sustained_low_cpu = 0.85;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWeight { rule: "memory_leak", .. })
        ));
    }

    #[test]
    fn test_threshold_order_enforced() {
        let mut config = DetectorConfig::default();
        config.scoring.potential_zombie_threshold = 80.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Thresholds { .. })
        ));
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let mut config = DetectorConfig::default();
        config.exclusion.namespaces.push("Kube_System".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidNamespace(ns)) if ns == "Kube_System"
        ));
    }

    #[test]
    fn test_namespace_syntax() {
        assert!(is_valid_namespace("kube-system"));
        assert!(is_valid_namespace("team42"));
        assert!(!is_valid_namespace("-leading"));
        assert!(!is_valid_namespace("trailing-"));
        assert!(!is_valid_namespace(""));
        assert!(!is_valid_namespace(&"a".repeat(64)));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = DetectorConfig::default();
        config.orchestrator.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[scoring]
zombie_threshold = 80.0

[exclusion]
namespaces = ["kube-system", "batch"]

[rules.stuck_process]
min_repetitions = 4
"#
        )
        .unwrap();

        let config = DetectorConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.scoring.zombie_threshold, 80.0);
        assert_eq!(config.scoring.potential_zombie_threshold, 40.0);
        assert_eq!(config.exclusion.namespaces, vec!["kube-system", "batch"]);
        assert_eq!(config.rules.stuck_process.min_repetitions, 4);
        assert_eq!(config.rules.stuck_process.spike_threshold, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = DetectorConfig::load(Some(Path::new("/nonexistent/zombie.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
