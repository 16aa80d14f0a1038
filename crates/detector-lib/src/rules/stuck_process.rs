//! Stuck process
//!
//! A short CPU spike followed by a long idle run is one occurrence. A
//! single 30-minute window rarely holds more than one, so occurrences are
//! counted across cycles through the pattern tracker and the rule fires
//! once enough of them fall within the lookback.

use super::RuleContext;
use crate::config::StuckProcessRuleConfig;
use crate::models::{MetricSample, RuleId, RuleResult};

const RULE: RuleId = RuleId::StuckProcess;

/// Start timestamps of every spike-then-idle cycle in `samples`
///
/// A spike is a run of samples above `spike_threshold` lasting less than
/// `spike_max_duration_secs`. It qualifies when the samples right after it
/// stay below `idle_threshold` for longer than `idle_min_duration_secs`.
/// A run already in progress at the first sample has no known start and
/// never qualifies.
pub fn scan_spike_idle_cycles(samples: &[MetricSample], cfg: &StuckProcessRuleConfig) -> Vec<i64> {
    let spike_max = cfg.spike_max_duration_secs as i64;
    let idle_min = cfg.idle_min_duration_secs as i64;
    let mut cycles = Vec::new();

    let mut i = 0;
    while i < samples.len() {
        if samples[i].cpu_fraction <= cfg.spike_threshold {
            i += 1;
            continue;
        }

        let spike_start = i;
        let mut j = i;
        while j < samples.len() && samples[j].cpu_fraction > cfg.spike_threshold {
            j += 1;
        }
        let spike_duration = samples[j - 1].timestamp - samples[spike_start].timestamp;

        let mut k = j;
        while k < samples.len() && samples[k].cpu_fraction < cfg.idle_threshold {
            k += 1;
        }
        if spike_start > 0 && spike_duration < spike_max && k > j {
            let idle_duration = samples[k - 1].timestamp - samples[j].timestamp;
            if idle_duration > idle_min {
                cycles.push(samples[spike_start].timestamp);
            }
        }

        i = j;
    }

    cycles
}

pub(super) fn evaluate(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(samples) = ctx.covered_window(RULE) else {
        return ctx.insufficient_data(RULE);
    };
    let cfg = &ctx.config.stuck_process;
    let lookback = cfg.lookback_secs as i64;
    let cutoff = ctx.now.saturating_sub(lookback);

    let in_window = scan_spike_idle_cycles(samples, cfg);
    let recorded = ctx.stuck_state.count_within(ctx.now, lookback);
    let after = ctx.stuck_state.last_occurrence.unwrap_or(i64::MIN);
    let unrecorded = in_window
        .iter()
        .filter(|&&ts| ts > after && ts >= cutoff)
        .count();
    let repetitions = recorded + unrecorded;

    let evidence = |r: RuleResult| {
        r.with_evidence("cycles_in_window", in_window.len() as f64)
            .with_evidence("repetitions", repetitions as f64)
    };

    if in_window.is_empty() {
        return evidence(RuleResult::abstain(RULE, "no spike pattern"));
    }
    let min = cfg.min_repetitions as usize;
    if repetitions < min {
        return evidence(RuleResult::abstain(RULE, "too few repetitions"));
    }

    // 0.5 at the minimum, approaching 1 with each extra repetition
    let extra = (repetitions - min + 1) as i32;
    evidence(RuleResult::triggered(RULE, 1.0 - 0.5f64.powi(extra)))
}
