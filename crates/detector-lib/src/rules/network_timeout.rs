//! Network timeout loop
//!
//! A container retrying a dead peer makes small outbound attempts at a
//! steady cadence while doing nothing else. Every sample that records an
//! attempt counts as one attempt event; the rule looks at how regular the
//! gaps between events are and how little each attempt transfers.

use super::stats::{mean, mean_cpu, std_dev};
use super::RuleContext;
use crate::models::{RuleId, RuleResult};

const RULE: RuleId = RuleId::NetworkTimeout;

pub(super) fn evaluate(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(samples) = ctx.covered_window(RULE) else {
        return ctx.insufficient_data(RULE);
    };
    let cfg = &ctx.config.network_timeout;

    let attempts: Vec<_> = samples.iter().filter(|s| s.connection_attempts > 0).collect();
    if attempts.is_empty() {
        return RuleResult::abstain(RULE, "no connection attempts");
    }

    let cpu = mean_cpu(samples);
    let bytes_per_attempt: Vec<f64> = attempts
        .iter()
        .map(|s| s.network_bytes as f64 / s.connection_attempts as f64)
        .collect();
    let intervals: Vec<f64> = attempts
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp) as f64)
        .collect();
    let mean_interval = mean(intervals.iter().copied());
    let cv = if mean_interval > 0.0 {
        std_dev(&intervals) / mean_interval
    } else {
        0.0
    };
    let mean_bytes = mean(bytes_per_attempt.iter().copied());

    let evidence = |r: RuleResult| {
        r.with_evidence("attempts", attempts.len() as f64)
            .with_evidence("mean_interval_secs", mean_interval)
            .with_evidence("interval_cv", cv)
            .with_evidence("mean_bytes_per_attempt", mean_bytes)
            .with_evidence("mean_cpu", cpu)
    };

    if cpu >= cfg.cpu_threshold {
        return evidence(RuleResult::abstain(RULE, "cpu active"));
    }
    if attempts.len() < cfg.min_attempts {
        return evidence(RuleResult::abstain(RULE, "too few attempts"));
    }
    if bytes_per_attempt
        .iter()
        .any(|&b| b >= cfg.max_bytes_per_attempt)
    {
        return evidence(RuleResult::abstain(RULE, "attempts carry payload"));
    }
    let (min_interval, max_interval) = (cfg.min_interval_secs as f64, cfg.max_interval_secs as f64);
    if mean_interval < min_interval || mean_interval > max_interval || cv > cfg.max_interval_cv {
        return evidence(RuleResult::abstain(RULE, "attempts not periodic"));
    }

    let regularity = (1.0 - cv).clamp(0.0, 1.0);
    let smallness = (1.0 - mean_bytes / cfg.max_bytes_per_attempt).clamp(0.0, 1.0);
    let score = regularity * smallness;
    if score <= 0.0 {
        return evidence(RuleResult::abstain(RULE, "no timeout pattern"));
    }
    evidence(RuleResult::triggered(RULE, score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::models::MetricSample;
    use crate::pattern::RuleState;
    use crate::rules::fixtures::*;

    const NOW: i64 = 90_000;

    /// Idle series with one attempt of `bytes` at each timestamp in `at`
    fn with_attempts(cpu: f64, at: &[i64], bytes: u64) -> Vec<MetricSample> {
        series(NOW, 3600, |t| {
            let hit = at.contains(&t);
            MetricSample {
                network_bytes: if hit { bytes } else { 0 },
                connection_attempts: u32::from(hit),
                ..sample(t, cpu, 64 << 20)
            }
        })
    }

    fn run(samples: &[MetricSample]) -> RuleResult {
        let windows = window_set(samples, NOW);
        let state = RuleState::default();
        let config = RuleConfig::default();
        evaluate(&context(&windows, &state, &config, NOW))
    }

    /// Five attempts roughly two minutes apart, jittered onto the 15s grid
    fn periodic() -> Vec<i64> {
        vec![NOW - 600, NOW - 480, NOW - 345, NOW - 225, NOW - 105]
    }

    #[test]
    fn test_periodic_small_attempts_trigger() {
        let result = run(&with_attempts(0.005, &periodic(), 80));

        assert!(result.triggered);
        assert!(result.score > 0.8, "score {}", result.score);
        assert_eq!(result.evidence["attempts"], 5.0);
    }

    #[test]
    fn test_no_attempts_abstains() {
        let result = run(&with_attempts(0.005, &[], 0));
        assert!(!result.applicable);
    }

    #[test]
    fn test_payload_abstains() {
        let result = run(&with_attempts(0.005, &periodic(), 4096));
        assert!(!result.applicable);
        assert!(!result.triggered);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_irregular_attempts_abstain() {
        let irregular = vec![NOW - 1500, NOW - 1485, NOW - 900, NOW - 885, NOW - 90];
        let result = run(&with_attempts(0.005, &irregular, 80));
        assert!(!result.applicable);
        assert_eq!(result.reason.as_deref(), Some("attempts not periodic"));
    }

    #[test]
    fn test_busy_container_abstains() {
        let result = run(&with_attempts(0.2, &periodic(), 80));
        assert!(!result.triggered);
        assert!(!result.applicable);
    }
}
