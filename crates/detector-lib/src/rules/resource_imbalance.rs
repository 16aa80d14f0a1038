//! Resource imbalance
//!
//! A container holding a large memory limit while using a sliver of it and
//! almost no CPU. The rule abstains whenever that picture does not hold,
//! including containers with no limit or a small one.

use super::stats::{mean, mean_cpu};
use super::RuleContext;
use crate::models::{RuleId, RuleResult};

const RULE: RuleId = RuleId::ResourceImbalance;

pub(super) fn evaluate(ctx: &RuleContext<'_>) -> RuleResult {
    let Some(samples) = ctx.covered_window(RULE) else {
        return ctx.insufficient_data(RULE);
    };
    let cfg = &ctx.config.resource_imbalance;

    let limit = ctx
        .memory_limit_bytes
        .or_else(|| samples.iter().rev().find_map(|s| s.memory_limit_bytes))
        .filter(|&l| l > 0);
    let Some(limit) = limit else {
        return RuleResult::abstain(RULE, "no memory limit");
    };
    if limit <= cfg.min_memory_limit_bytes {
        return RuleResult::abstain(RULE, "memory limit too small")
            .with_evidence("memory_limit_bytes", limit as f64);
    }

    let usage = mean(samples.iter().map(|s| s.memory_used_bytes as f64)) / limit as f64;
    let cpu = mean_cpu(samples);
    let evidence = |r: RuleResult| {
        r.with_evidence("memory_limit_bytes", limit as f64)
            .with_evidence("memory_usage_ratio", usage)
            .with_evidence("mean_cpu", cpu)
    };

    if usage >= cfg.memory_usage_ceiling {
        return evidence(RuleResult::abstain(RULE, "reservation in use"));
    }
    if cpu >= cfg.cpu_ceiling {
        return evidence(RuleResult::abstain(RULE, "cpu active"));
    }

    let memory_headroom = 1.0 - usage / cfg.memory_usage_ceiling;
    let cpu_headroom = 1.0 - cpu / cfg.cpu_ceiling;
    evidence(RuleResult::triggered(RULE, (memory_headroom + cpu_headroom) / 2.0))
}
