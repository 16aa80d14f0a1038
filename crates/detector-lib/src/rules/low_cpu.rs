//! Sustained low CPU
//!
//! Mean CPU under the threshold across the 30-minute window, with memory
//! not shrinking and network throughput negligible. The score ramps from 0
//! at the threshold to 1 at the idle floor.

use super::stats::{mean_cpu, memory_trend, network_rate};
use super::{ramp_below, RuleContext};
use crate::models::{RuleId, RuleResult};

const RULE: RuleId = RuleId::SustainedLowCpu;

pub(super) fn evaluate(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(samples) = ctx.covered_window(RULE) else {
        return ctx.insufficient_data(RULE);
    };
    let cfg = &ctx.config.sustained_low_cpu;

    let cpu = mean_cpu(samples);
    let network = network_rate(samples, ctx.sample_interval_secs);
    let memory_change = memory_trend(samples).unwrap_or(0.0);

    let with_evidence = |result: RuleResult| {
        result
            .with_evidence("mean_cpu", cpu)
            .with_evidence("network_bytes_per_sec", network)
            .with_evidence("memory_change", memory_change)
    };

    if cpu >= cfg.cpu_threshold {
        return with_evidence(RuleResult::clear(RULE));
    }
    if network > cfg.network_floor_bytes_per_sec {
        return with_evidence(RuleResult::clear(RULE).with_reason("network active"));
    }
    if memory_change < -cfg.memory_decrease_tolerance {
        return with_evidence(RuleResult::clear(RULE).with_reason("memory decreasing"));
    }

    let score = ramp_below(cpu, cfg.cpu_threshold, cfg.idle_cpu_floor);
    if score <= 0.0 {
        return with_evidence(RuleResult::clear(RULE));
    }
    with_evidence(RuleResult::triggered(RULE, score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::pattern::RuleState;
    use crate::rules::fixtures::*;

    const NOW: i64 = 50_000;
    const MIB: u64 = 1024 * 1024;

    fn run(samples: &[crate::models::MetricSample]) -> RuleResult {
        let windows = window_set(samples, NOW);
        let state = RuleState::default();
        let config = RuleConfig::default();
        evaluate(&context(&windows, &state, &config, NOW))
    }

    #[test]
    fn test_idle_container_scores_high() {
        let samples = series(NOW, 3600, |t| sample(t, 0.01, 200 * MIB));
        let result = run(&samples);

        assert!(result.triggered);
        assert!(result.score > 0.8, "score {}", result.score);
        assert!((result.evidence["mean_cpu"] - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_below_idle_floor_saturates() {
        let samples = series(NOW, 3600, |t| sample(t, 0.001, 200 * MIB));
        assert_eq!(run(&samples).score, 1.0);
    }

    #[test]
    fn test_busy_container_clear() {
        let samples = series(NOW, 3600, |t| sample(t, 0.25, 200 * MIB));
        let result = run(&samples);

        assert!(result.applicable);
        assert!(!result.triggered);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_network_traffic_gates() {
        let samples = series(NOW, 3600, |t| crate::models::MetricSample {
            network_bytes: 30_000,
            ..sample(t, 0.01, 200 * MIB)
        });
        let result = run(&samples);

        assert!(!result.triggered);
        assert_eq!(result.reason.as_deref(), Some("network active"));
    }

    #[test]
    fn test_shrinking_memory_gates() {
        let samples = series(NOW, 3600, |t| sample(t, 0.01, (400 * MIB) - (t - NOW + 3600) as u64 * 20_000));
        let result = run(&samples);

        assert!(!result.triggered);
        assert_eq!(result.reason.as_deref(), Some("memory decreasing"));
    }
}
