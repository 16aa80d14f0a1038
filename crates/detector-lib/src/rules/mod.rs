//! Zombie heuristics
//!
//! Five fixed rules, each a pure function of a [`RuleContext`]:
//! - Sustained low CPU with flat memory and no network traffic
//! - Memory growth without matching activity (leak)
//! - Repeated short CPU spikes followed by long idle periods (stuck process)
//! - Periodic tiny outbound connection attempts (network timeout loop)
//! - Large memory reservation that is barely used (resource imbalance)
//!
//! Sustained low CPU is the baseline: it scores whenever its window has
//! data. The other four abstain unless their pattern is present, so a
//! missing pattern never dilutes the baseline in the aggregate.
//!
//! Rules never touch shared state. The stuck-process rule reads a snapshot
//! of its repetition history; the orchestrator folds new evidence into the
//! tracker after evaluation.

mod low_cpu;
mod memory_leak;
mod network_timeout;
mod resource_imbalance;
pub mod stats;
mod stuck_process;

pub use stuck_process::scan_spike_idle_cycles;

use crate::config::RuleConfig;
use crate::models::{MetricSample, RuleId, RuleResult};
use crate::pattern::{RuleEvidence, RuleState};
use crate::window::{Granularity, WindowSet};

/// Everything a rule may look at for one container
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub windows: &'a WindowSet,
    /// Stuck-process repetition history as of the previous cycle
    pub stuck_state: &'a RuleState,
    /// Memory limit reported by the inventory, if any
    pub memory_limit_bytes: Option<u64>,
    /// Store clock the windows end at
    pub now: i64,
    pub config: &'a RuleConfig,
    pub sample_interval_secs: u64,
    pub min_coverage: f64,
}

impl<'a> RuleContext<'a> {
    /// Fraction of the expected samples present in a window
    pub fn coverage(&self, granularity: Granularity) -> f64 {
        let interval = self.sample_interval_secs.max(1) as f64;
        let expected = (granularity.duration_secs() as f64 / interval).max(1.0);
        (self.windows.get(granularity).len() as f64 / expected).min(1.0)
    }

    /// The rule's window, if it holds enough samples to judge
    pub fn covered_window(&self, rule: RuleId) -> Option<&'a [MetricSample]> {
        let granularity = rule.granularity();
        let samples = self.windows.get(granularity);
        if samples.len() >= 2 && self.coverage(granularity) >= self.min_coverage {
            Some(samples)
        } else {
            None
        }
    }

    /// Result for a rule whose window is too sparse
    pub fn insufficient_data(&self, rule: RuleId) -> RuleResult {
        RuleResult::abstain(rule, "insufficient data")
            .with_evidence("coverage", self.coverage(rule.granularity()))
    }
}

impl RuleId {
    /// Window each rule reads
    pub fn granularity(&self) -> Granularity {
        match self {
            RuleId::SustainedLowCpu => Granularity::ThirtyMinutes,
            RuleId::MemoryLeak => Granularity::OneHour,
            RuleId::StuckProcess => Granularity::ThirtyMinutes,
            RuleId::NetworkTimeout => Granularity::ThirtyMinutes,
            RuleId::ResourceImbalance => Granularity::OneHour,
        }
    }

    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> RuleResult {
        match self {
            RuleId::SustainedLowCpu => low_cpu::evaluate(ctx),
            RuleId::MemoryLeak => memory_leak::evaluate(ctx),
            RuleId::StuckProcess => stuck_process::evaluate(ctx),
            RuleId::NetworkTimeout => network_timeout::evaluate(ctx),
            RuleId::ResourceImbalance => resource_imbalance::evaluate(ctx),
        }
    }
}

/// Run every rule in [`RuleId::ALL`] order
pub fn evaluate_all(ctx: &RuleContext<'_>) -> Vec<RuleResult> {
    RuleId::ALL.iter().map(|rule| rule.evaluate(ctx)).collect()
}

/// Stuck-process occurrences in the current window, for the pattern tracker
pub fn stuck_process_evidence(ctx: &RuleContext<'_>) -> RuleEvidence {
    let samples = ctx.windows.get(RuleId::StuckProcess.granularity());
    RuleEvidence::new(scan_spike_idle_cycles(samples, &ctx.config.stuck_process))
}

/// Linear score: 0 at `ceiling`, 1 at or below `floor`
pub(crate) fn ramp_below(value: f64, ceiling: f64, floor: f64) -> f64 {
    if ceiling <= floor {
        return if value < ceiling { 1.0 } else { 0.0 };
    }
    ((ceiling - value) / (ceiling - floor)).clamp(0.0, 1.0)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const INTERVAL: i64 = 15;

    pub fn sample(timestamp: i64, cpu: f64, memory: u64) -> MetricSample {
        MetricSample {
            timestamp,
            cpu_fraction: cpu,
            memory_used_bytes: memory,
            memory_limit_bytes: None,
            network_bytes: 0,
            connection_attempts: 0,
        }
    }

    /// One sample every 15s for `duration_secs`, ending at `end`
    pub fn series(
        end: i64,
        duration_secs: i64,
        f: impl Fn(i64) -> MetricSample,
    ) -> Vec<MetricSample> {
        let start = end - duration_secs;
        (0..=duration_secs / INTERVAL)
            .map(|i| f(start + i * INTERVAL))
            .collect()
    }

    /// Split a 6h-or-shorter series into every granularity
    pub fn window_set(samples: &[MetricSample], now: i64) -> WindowSet {
        let view = |g: Granularity| {
            samples
                .iter()
                .filter(|s| s.timestamp >= now - g.duration_secs() && s.timestamp <= now)
                .cloned()
                .collect::<Vec<_>>()
        };
        WindowSet {
            five_minutes: view(Granularity::FiveMinutes),
            thirty_minutes: view(Granularity::ThirtyMinutes),
            one_hour: view(Granularity::OneHour),
            six_hours: view(Granularity::SixHours),
        }
    }

    pub fn context<'a>(
        windows: &'a WindowSet,
        state: &'a RuleState,
        config: &'a RuleConfig,
        now: i64,
    ) -> RuleContext<'a> {
        RuleContext {
            windows,
            stuck_state: state,
            memory_limit_bytes: None,
            now,
            config,
            sample_interval_secs: INTERVAL as u64,
            min_coverage: 0.5,
        }
    }
}
