//! Multi-granularity sliding windows of metric samples
//!
//! Each container keeps one ordered series covering the longest window;
//! the shorter granularities are views over its tail. The store clock is
//! the newest timestamp it has been told about, so window bounds are
//! deterministic for a given ingestion sequence regardless of wall time.

use crate::models::{ContainerIdentity, MetricSample};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tracing::{debug, error};

/// Ingestion invariant violations
#[derive(Debug, Error, PartialEq)]
pub enum WindowError {
    #[error(
        "out-of-order sample for {container}: timestamp {timestamp} is older than latest {latest}"
    )]
    OutOfOrder {
        container: String,
        timestamp: i64,
        latest: i64,
    },
}

/// Supported window lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    FiveMinutes,
    ThirtyMinutes,
    OneHour,
    SixHours,
}

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::FiveMinutes,
        Granularity::ThirtyMinutes,
        Granularity::OneHour,
        Granularity::SixHours,
    ];

    pub fn duration_secs(&self) -> i64 {
        match self {
            Granularity::FiveMinutes => 5 * 60,
            Granularity::ThirtyMinutes => 30 * 60,
            Granularity::OneHour => 60 * 60,
            Granularity::SixHours => 6 * 60 * 60,
        }
    }

    /// The longest supported window, which bounds retention
    pub fn longest() -> Granularity {
        Granularity::SixHours
    }
}

/// What happened to a single ingested sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Appended,
    /// Timestamp already recorded; sample dropped
    Duplicate,
    /// Older than the longest window; sample dropped
    Expired,
}

/// Counts for a batch ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub appended: usize,
    pub duplicates: usize,
    pub expired: usize,
}

/// Consistent snapshot of every granularity for one container
#[derive(Debug, Clone, Default)]
pub struct WindowSet {
    pub five_minutes: Vec<MetricSample>,
    pub thirty_minutes: Vec<MetricSample>,
    pub one_hour: Vec<MetricSample>,
    pub six_hours: Vec<MetricSample>,
}

impl WindowSet {
    pub fn get(&self, granularity: Granularity) -> &[MetricSample] {
        match granularity {
            Granularity::FiveMinutes => &self.five_minutes,
            Granularity::ThirtyMinutes => &self.thirty_minutes,
            Granularity::OneHour => &self.one_hour,
            Granularity::SixHours => &self.six_hours,
        }
    }
}

#[derive(Debug)]
struct ContainerSeries {
    samples: VecDeque<MetricSample>,
    last_seen: i64,
}

impl ContainerSeries {
    fn new(last_seen: i64) -> Self {
        Self {
            samples: VecDeque::new(),
            last_seen,
        }
    }

    fn contains(&self, timestamp: i64) -> bool {
        self.samples
            .binary_search_by_key(&timestamp, |s| s.timestamp)
            .is_ok()
    }

    fn latest(&self) -> Option<i64> {
        self.samples.back().map(|s| s.timestamp)
    }

    fn expire(&mut self, cutoff: i64) {
        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn view(&self, from: i64, to: i64) -> Vec<MetricSample> {
        let start = self.samples.partition_point(|s| s.timestamp < from);
        self.samples
            .range(start..)
            .take_while(|s| s.timestamp <= to)
            .cloned()
            .collect()
    }
}

/// Per-container sample windows shared by the orchestrator and the rules
pub struct MetricWindowStore {
    series: DashMap<ContainerIdentity, ContainerSeries>,
    now: AtomicI64,
    retention_secs: i64,
}

impl MetricWindowStore {
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
            now: AtomicI64::new(i64::MIN),
            retention_secs: Granularity::longest().duration_secs(),
        }
    }

    /// Current store clock
    pub fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    /// Move the store clock forward; earlier values are ignored
    pub fn advance_clock(&self, timestamp: i64) {
        self.now.fetch_max(timestamp, Ordering::SeqCst);
    }

    /// Append one sample
    pub fn ingest(
        &self,
        container: &ContainerIdentity,
        sample: MetricSample,
    ) -> Result<IngestOutcome, WindowError> {
        self.advance_clock(sample.timestamp);
        let cutoff = self.now().saturating_sub(self.retention_secs);

        let mut series = self
            .series
            .entry(container.clone())
            .or_insert_with(|| ContainerSeries::new(sample.timestamp));

        let outcome = Self::classify(container, &series, &sample, cutoff)?;
        if outcome == IngestOutcome::Appended {
            series.samples.push_back(sample);
        }
        series.expire(cutoff);
        Ok(outcome)
    }

    /// Append a batch for one container, all or nothing
    ///
    /// The batch is sorted first. If any sample would violate ordering the
    /// series is left untouched and the error is returned.
    pub fn ingest_batch(
        &self,
        container: &ContainerIdentity,
        mut samples: Vec<MetricSample>,
    ) -> Result<BatchSummary, WindowError> {
        samples.sort_by_key(|s| s.timestamp);
        let Some(newest) = samples.last().map(|s| s.timestamp) else {
            return Ok(BatchSummary::default());
        };

        let mut series = self
            .series
            .entry(container.clone())
            .or_insert_with(|| ContainerSeries::new(newest));

        let clock = self.now().max(newest);
        let cutoff = clock.saturating_sub(self.retention_secs);

        // Validate against the existing series before touching it
        let mut latest = series.latest();
        let mut outcomes = Vec::with_capacity(samples.len());
        for sample in &samples {
            let outcome = match latest {
                Some(last) if sample.timestamp == last => IngestOutcome::Duplicate,
                Some(last) if sample.timestamp < last => {
                    if series.contains(sample.timestamp) {
                        IngestOutcome::Duplicate
                    } else {
                        error!(
                            container = %container,
                            timestamp = sample.timestamp,
                            latest = last,
                            "Rejected out-of-order batch"
                        );
                        return Err(WindowError::OutOfOrder {
                            container: container.to_string(),
                            timestamp: sample.timestamp,
                            latest: last,
                        });
                    }
                }
                _ if sample.timestamp < cutoff => IngestOutcome::Expired,
                _ => {
                    latest = Some(sample.timestamp);
                    IngestOutcome::Appended
                }
            };
            outcomes.push(outcome);
        }

        self.advance_clock(newest);

        let mut summary = BatchSummary::default();
        for (sample, outcome) in samples.into_iter().zip(outcomes) {
            match outcome {
                IngestOutcome::Appended => {
                    series.samples.push_back(sample);
                    summary.appended += 1;
                }
                IngestOutcome::Duplicate => summary.duplicates += 1,
                IngestOutcome::Expired => summary.expired += 1,
            }
        }
        series.expire(cutoff);

        debug!(
            container = %container,
            appended = summary.appended,
            duplicates = summary.duplicates,
            expired = summary.expired,
            "Ingested batch"
        );
        Ok(summary)
    }

    fn classify(
        container: &ContainerIdentity,
        series: &ContainerSeries,
        sample: &MetricSample,
        cutoff: i64,
    ) -> Result<IngestOutcome, WindowError> {
        match series.latest() {
            Some(last) if sample.timestamp == last => Ok(IngestOutcome::Duplicate),
            Some(last) if sample.timestamp < last => {
                if series.contains(sample.timestamp) {
                    Ok(IngestOutcome::Duplicate)
                } else {
                    error!(
                        container = %container,
                        timestamp = sample.timestamp,
                        latest = last,
                        "Rejected out-of-order sample"
                    );
                    Err(WindowError::OutOfOrder {
                        container: container.to_string(),
                        timestamp: sample.timestamp,
                        latest: last,
                    })
                }
            }
            _ if sample.timestamp < cutoff => Ok(IngestOutcome::Expired),
            _ => Ok(IngestOutcome::Appended),
        }
    }

    /// Samples inside `granularity` ending at the store clock, oldest first
    pub fn window(&self, container: &ContainerIdentity, granularity: Granularity) -> Vec<MetricSample> {
        let now = self.now();
        match self.series.get(container) {
            Some(series) => series.view(now.saturating_sub(granularity.duration_secs()), now),
            None => Vec::new(),
        }
    }

    /// All granularities taken under one lock
    pub fn window_set(&self, container: &ContainerIdentity) -> WindowSet {
        let now = self.now();
        let Some(series) = self.series.get(container) else {
            return WindowSet::default();
        };
        let view = |g: Granularity| series.view(now.saturating_sub(g.duration_secs()), now);
        WindowSet {
            five_minutes: view(Granularity::FiveMinutes),
            thirty_minutes: view(Granularity::ThirtyMinutes),
            one_hour: view(Granularity::OneHour),
            six_hours: view(Granularity::SixHours),
        }
    }

    /// Newest recorded timestamp, used for incremental fetching
    pub fn latest_timestamp(&self, container: &ContainerIdentity) -> Option<i64> {
        self.series.get(container).and_then(|s| s.latest())
    }

    /// Record that the inventory still lists these containers
    pub fn mark_seen<'a>(&self, containers: impl IntoIterator<Item = &'a ContainerIdentity>, now: i64) {
        for container in containers {
            if let Some(mut series) = self.series.get_mut(container) {
                series.last_seen = series.last_seen.max(now);
            }
        }
    }

    /// Drop containers unseen for longer than the longest window and trim
    /// expired samples everywhere. Returns the number of containers removed.
    pub fn evict_absent(&self, now: i64) -> usize {
        let cutoff = now.saturating_sub(self.retention_secs);
        let before = self.series.len();
        self.series.retain(|container, series| {
            if series.last_seen < cutoff {
                debug!(container = %container, "Evicting absent container windows");
                return false;
            }
            series.expire(cutoff);
            true
        });
        before.saturating_sub(self.series.len())
    }

    pub fn container_count(&self) -> usize {
        self.series.len()
    }

    pub fn sample_count(&self) -> usize {
        self.series.iter().map(|s| s.samples.len()).sum()
    }
}

impl Default for MetricWindowStore {
    fn default() -> Self {
        Self::new()
    }
}
