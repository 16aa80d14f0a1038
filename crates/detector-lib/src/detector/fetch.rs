//! Per-container metric fetching and sample assembly

use crate::models::{ContainerInfo, MetricSample};
use crate::source::{MetricKind, MetricsSource, Point, RetryPolicy, SourceError, TimeRange};
use std::collections::HashMap;
use tracing::debug;

/// Range to request for a container
///
/// Containers already in the store continue one step after their newest
/// sample; new ones are backfilled over `backfill_secs`. Starts are kept on
/// the step grid so successive fetches line up.
pub(crate) fn fetch_range(latest: Option<i64>, now: i64, backfill_secs: i64, step_secs: u64) -> TimeRange {
    let step = step_secs.max(1) as i64;
    let start = match latest {
        Some(latest) => latest + step,
        None => (now - backfill_secs).div_euclid(step) * step,
    };
    TimeRange {
        start,
        end: now,
        step_secs: step as u64,
    }
}

async fn query(
    source: &dyn MetricsSource,
    retry: &RetryPolicy,
    info: &ContainerInfo,
    metric: MetricKind,
    range: TimeRange,
) -> Result<Vec<Point>, SourceError> {
    let container = &info.identity;
    retry
        .run("query_range", move || source.query_range(container, metric, range))
        .await
}

/// Fetch every metric for one container and join them into samples
pub(crate) async fn fetch_samples(
    source: &dyn MetricsSource,
    retry: &RetryPolicy,
    info: &ContainerInfo,
    range: TimeRange,
) -> Result<Vec<MetricSample>, SourceError> {
    if range.start > range.end {
        return Ok(Vec::new());
    }

    let cpu = query(source, retry, info, MetricKind::Cpu, range).await?;
    let memory = query(source, retry, info, MetricKind::Memory, range).await?;
    let network = query(source, retry, info, MetricKind::NetworkBytes, range).await?;
    let attempts = query(source, retry, info, MetricKind::ConnectionAttempts, range).await?;

    let samples = join_samples(&cpu, &memory, &network, &attempts, info.memory_limit_bytes);
    debug!(
        container = %info.identity,
        start = range.start,
        end = range.end,
        points = cpu.len(),
        samples = samples.len(),
        "Assembled samples"
    );
    Ok(samples)
}

/// Join the four series on the CPU timestamps
///
/// A timestamp needs a valid CPU and memory value to become a sample;
/// missing network or connection points count as zero. Negative or
/// non-finite readings are treated as missing.
pub(crate) fn join_samples(
    cpu: &[Point],
    memory: &[Point],
    network: &[Point],
    attempts: &[Point],
    memory_limit_bytes: Option<u64>,
) -> Vec<MetricSample> {
    fn index(points: &[Point]) -> HashMap<i64, f64> {
        points
            .iter()
            .filter(|(_, v)| v.is_finite() && *v >= 0.0)
            .copied()
            .collect()
    }
    let memory = index(memory);
    let network = index(network);
    let attempts = index(attempts);

    cpu.iter()
        .filter(|(_, v)| v.is_finite() && *v >= 0.0)
        .filter_map(|&(timestamp, cpu)| {
            let memory_used = memory.get(&timestamp)?;
            Some(MetricSample {
                timestamp,
                cpu_fraction: cpu,
                memory_used_bytes: memory_used.round() as u64,
                memory_limit_bytes,
                network_bytes: network.get(&timestamp).map_or(0, |v| v.round() as u64),
                connection_attempts: attempts.get(&timestamp).map_or(0, |v| v.round() as u32),
            })
        })
        .collect()
}
