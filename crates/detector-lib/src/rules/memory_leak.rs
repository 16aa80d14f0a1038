//! Memory leak
//!
//! Memory grows by at least the growth floor over the hour while CPU stays
//! low and the network activity proxy does not grow with it. Growth is
//! measured on the least-squares fit so a single noisy sample cannot fake
//! or hide a trend.

use super::stats::{mean, mean_cpu, memory_trend};
use super::RuleContext;
use crate::models::{MetricSample, RuleId, RuleResult};

const RULE: RuleId = RuleId::MemoryLeak;

pub(super) fn evaluate(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(samples) = ctx.covered_window(RULE) else {
        return ctx.insufficient_data(RULE);
    };
    let cfg = &ctx.config.memory_leak;

    let Some(growth) = memory_trend(samples) else {
        return RuleResult::abstain(RULE, "no memory baseline");
    };
    if growth < cfg.growth_floor {
        return RuleResult::abstain(RULE, "memory not growing").with_evidence("growth", growth);
    }

    let cpu = mean_cpu(samples);
    let activity_increase = activity_increase(samples, ctx.sample_interval_secs);
    let result = |r: RuleResult| {
        r.with_evidence("growth", growth)
            .with_evidence("mean_cpu", cpu)
            .with_evidence("activity_increase_bytes_per_sec", activity_increase.absolute)
    };

    if cpu >= cfg.cpu_threshold {
        return result(RuleResult::abstain(RULE, "cpu active"));
    }
    if activity_increase.absolute > cfg.activity_floor_bytes_per_sec
        && activity_increase.relative > cfg.activity_growth_tolerance
    {
        return result(RuleResult::abstain(RULE, "activity grew with memory"));
    }

    result(RuleResult::triggered(RULE, growth / (2.0 * cfg.growth_floor)))
}

struct ActivityIncrease {
    /// Second-half minus first-half network rate, bytes per second
    absolute: f64,
    /// Relative to the first half; infinite when the first half was silent
    relative: f64,
}

fn activity_increase(samples: &[MetricSample], interval_secs: u64) -> ActivityIncrease {
    let interval = interval_secs.max(1) as f64;
    let (first, second) = samples.split_at(samples.len() / 2);
    let rate = |half: &[MetricSample]| mean(half.iter().map(|s| s.network_bytes as f64)) / interval;
    let (before, after) = (rate(first), rate(second));

    let absolute = after - before;
    let relative = if before > 0.0 {
        absolute / before
    } else if absolute > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };
    ActivityIncrease { absolute, relative }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::pattern::RuleState;
    use crate::rules::fixtures::*;

    const NOW: i64 = 80_000;
    const BASE: f64 = 400.0 * 1024.0 * 1024.0;

    /// Memory grows linearly by `growth` over the last hour
    fn growing(growth: f64, cpu: f64, network: impl Fn(i64) -> u64) -> Vec<MetricSample> {
        series(NOW, 3600, |t| {
            let progress = (t - (NOW - 3600)) as f64 / 3600.0;
            MetricSample {
                network_bytes: network(t),
                ..sample(t, cpu, (BASE * (1.0 + growth * progress)) as u64)
            }
        })
    }

    fn run(samples: &[MetricSample]) -> RuleResult {
        let windows = window_set(samples, NOW);
        let state = RuleState::default();
        let config = RuleConfig::default();
        evaluate(&context(&windows, &state, &config, NOW))
    }

    #[test]
    fn test_quiet_growth_triggers() {
        let result = run(&growing(0.08, 0.02, |_| 0));

        assert!(result.triggered);
        assert!((result.evidence["growth"] - 0.08).abs() < 1e-3);
        assert!((result.score - 0.8).abs() < 1e-2);
    }

    #[test]
    fn test_flat_memory_abstains() {
        let result = run(&growing(0.0, 0.02, |_| 0));
        assert!(!result.applicable);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_busy_cpu_abstains() {
        let result = run(&growing(0.08, 0.30, |_| 0));
        assert!(!result.applicable);
        assert!(!result.triggered);
        assert_eq!(result.reason.as_deref(), Some("cpu active"));
    }

    #[test]
    fn test_growing_activity_explains_growth() {
        let result = run(&growing(0.08, 0.02, |t| if t > NOW - 1800 { 150_000 } else { 1_000 }));
        assert!(!result.applicable);
        assert_eq!(result.reason.as_deref(), Some("activity grew with memory"));
    }

    #[test]
    fn test_large_growth_saturates() {
        let result = run(&growing(0.5, 0.0, |_| 0));
        assert_eq!(result.score, 1.0);
    }
}
