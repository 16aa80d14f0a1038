//! Detection cycle orchestration
//!
//! One cycle lists containers, drops excluded ones, fetches their metrics
//! concurrently, ingests everything into the window store and only then
//! evaluates the rules, so every rule sees the same snapshot. Continuous
//! mode repeats the cycle on an interval until shutdown.

mod fetch;
mod report;


pub use report::{
    ClassificationChange, CycleOutcome, CyclePhase, CycleReport, CycleSummary, ExcludedContainer,
    FetchFailure,
};

use crate::config::DetectorConfig;
use crate::exclusion::{ExclusionFilter, ExclusionReason};
use crate::health::{components, HealthRegistry, LastCycle};
use crate::models::{ContainerInfo, DetectionResult, MetricSample, RuleId, RuleResult};
use crate::observability::{DetectorMetrics, StructuredLogger};
use crate::pattern::PatternStateTracker;
use crate::rules::{self, RuleContext};
use crate::scoring::ScoringAggregator;
use crate::source::{InventorySource, MetricsSource, RetryPolicy, SourceError};
use crate::window::MetricWindowStore;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Source of "now" for cycles, in Unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

type Fetched = (ContainerInfo, std::result::Result<Vec<MetricSample>, SourceError>);

/// Runs detection cycles against the inventory and metrics collaborators
pub struct Detector {
    inventory: Arc<dyn InventorySource>,
    metrics_source: Arc<dyn MetricsSource>,
    clock: Arc<dyn Clock>,
    config: DetectorConfig,
    store: MetricWindowStore,
    tracker: PatternStateTracker,
    filter: ExclusionFilter,
    aggregator: ScoringAggregator,
    retry: RetryPolicy,
    health: HealthRegistry,
    metrics: DetectorMetrics,
    logger: StructuredLogger,
    cycles: AtomicU64,
    phase: Mutex<CyclePhase>,
    history: Mutex<VecDeque<CycleSummary>>,
    latest: Mutex<Option<Arc<CycleReport>>>,
}

impl Detector {
    pub fn builder(config: DetectorConfig) -> DetectorBuilder {
        DetectorBuilder::new(config)
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn store(&self) -> &MetricWindowStore {
        &self.store
    }

    pub fn tracker(&self) -> &PatternStateTracker {
        &self.tracker
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: CyclePhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Summaries of the most recent cycles, oldest first
    pub fn history(&self) -> Vec<CycleSummary> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Report of the last cycle that was not skipped
    pub fn latest_report(&self) -> Option<Arc<CycleReport>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one full detection cycle
    ///
    /// Never fails: collaborator outages produce a `Skipped` report and
    /// leave the window store and pattern state untouched.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let timer = Instant::now();
        let started_at = self.clock.now();
        debug!(cycle = cycle, "Starting detection cycle");

        self.set_phase(CyclePhase::FetchingInventory);
        let inventory = match self
            .retry
            .run("list_containers", || self.inventory.list_containers())
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                self.health
                    .set_unhealthy(components::INVENTORY, e.to_string())
                    .await;
                let error = format!("inventory unavailable: {}", e);
                return self.skip_cycle(cycle, started_at, timer, error).await;
            }
        };
        self.health.set_healthy(components::INVENTORY).await;

        let now = self.clock.now();
        self.store
            .mark_seen(inventory.iter().map(|c| &c.identity), now);

        self.set_phase(CyclePhase::Filtering);
        let mut eligible = Vec::with_capacity(inventory.len());
        let mut excluded = Vec::new();
        for info in inventory {
            match self.filter.check(&info, now) {
                Some(reason) => {
                    debug!(container = %info.identity, reason = %reason, "Excluded container");
                    excluded.push(ExcludedContainer {
                        container: info.identity,
                        reason,
                    });
                }
                None => eligible.push(info),
            }
        }

        self.set_phase(CyclePhase::FetchingMetrics);
        let fetched = self.fetch_all(&eligible, now).await;
        let fetch_errors = fetched.iter().filter(|(_, r)| r.is_err()).count();
        self.metrics.inc_fetch_errors(fetch_errors as u64);

        if !eligible.is_empty() && fetch_errors == fetched.len() {
            let cause = fetched
                .iter()
                .find_map(|(_, r)| r.as_ref().err())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "every metric fetch task failed".to_string());
            self.health
                .set_unhealthy(components::METRICS_SOURCE, cause.clone())
                .await;
            let error = format!("metrics source unavailable: {}", cause);
            return self.skip_cycle(cycle, started_at, timer, error).await;
        }

        // Nothing below awaits until reporting, so a cancelled cycle either
        // ingested nothing or ingested and evaluated everything.
        self.store.advance_clock(now);
        let mut failures = Vec::new();
        let mut ready = Vec::with_capacity(fetched.len());
        for (info, result) in fetched {
            let ingested = result.map_err(|e| e.to_string()).and_then(|samples| {
                self.store
                    .ingest_batch(&info.identity, samples)
                    .map_err(|e| e.to_string())
            });
            match ingested {
                Ok(_) => ready.push(info),
                Err(error) => {
                    warn!(container = %info.identity, error = %error, "Container skipped this cycle");
                    failures.push(FetchFailure {
                        container: info.identity,
                        error,
                    });
                }
            }
        }

        self.set_phase(CyclePhase::Evaluating);
        let evaluated_at = self.store.now();
        let evaluated: Vec<(ContainerInfo, Vec<RuleResult>)> = ready
            .into_iter()
            .map(|info| {
                let results = self.evaluate_rules(&info, true);
                (info, results)
            })
            .collect();

        self.set_phase(CyclePhase::Aggregating);
        let mut results: Vec<DetectionResult> = evaluated
            .into_iter()
            .map(|(info, rule_results)| self.score(info, rule_results, evaluated_at))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.container.cmp(&b.container))
        });

        self.set_phase(CyclePhase::Reporting);
        let dropped_states = self.tracker.gc(evaluated_at);
        let evicted = self.store.evict_absent(now);
        if dropped_states > 0 || evicted > 0 {
            debug!(
                evicted_containers = evicted,
                dropped_states = dropped_states,
                "Collected absent container state"
            );
        }

        let outcome = if failures.is_empty() {
            CycleOutcome::Complete
        } else {
            CycleOutcome::Degraded {
                failed_containers: failures.len(),
            }
        };

        let changes = {
            let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = history.iter().rev().find(|s| s.outcome != "skipped");
            report::diff_classifications(previous, &results)
        };
        for change in &changes {
            self.logger.log_classification_change(
                &change.container.to_string(),
                change.previous,
                change.current,
                change.score,
            );
        }
        for result in results.iter().filter(|r| r.is_suspect()) {
            self.logger.log_detection(result);
        }

        let report = CycleReport {
            cycle,
            started_at,
            finished_at: self.clock.now(),
            outcome,
            results,
            excluded,
            failures,
            changes,
        };

        let elapsed = timer.elapsed().as_secs_f64();
        self.metrics.observe_cycle(report.outcome.label(), elapsed);
        self.metrics
            .set_cycle_counts(&report.results, report.excluded.len());
        self.metrics.set_store_size(
            self.store.container_count(),
            self.store.sample_count(),
            self.tracker.len(),
        );

        if report.failures.is_empty() {
            self.health.set_healthy(components::METRICS_SOURCE).await;
        } else {
            self.health
                .set_degraded(
                    components::METRICS_SOURCE,
                    format!("{} containers failed", report.failures.len()),
                )
                .await;
        }
        self.health.set_healthy(components::DETECTOR).await;
        self.health
            .record_cycle(LastCycle {
                cycle,
                finished_at: report.finished_at,
                outcome: report.outcome.label().to_string(),
            })
            .await;

        self.logger.log_cycle_completed(
            cycle,
            report.results.len(),
            report.excluded.len(),
            report.failures.len(),
            report.zombie_count(),
            report.potential_zombie_count(),
            elapsed,
        );

        self.remember(&report);
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(report.clone()));
        self.set_phase(CyclePhase::Idle);
        report
    }

    async fn skip_cycle(
        &self,
        cycle: u64,
        started_at: i64,
        timer: Instant,
        error: String,
    ) -> CycleReport {
        let finished_at = self.clock.now();
        self.logger.log_cycle_failed(cycle, &error);
        self.metrics
            .observe_cycle("skipped", timer.elapsed().as_secs_f64());
        self.health
            .record_cycle(LastCycle {
                cycle,
                finished_at,
                outcome: "skipped".to_string(),
            })
            .await;

        let report = CycleReport::skipped(cycle, started_at, finished_at, error);
        self.remember(&report);
        self.set_phase(CyclePhase::Idle);
        report
    }

    fn remember(&self, report: &CycleReport) {
        let limit = self.config.orchestrator.history_cycles.max(1);
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(CycleSummary::from_report(report));
        while history.len() > limit {
            history.pop_front();
        }
    }

    /// Fetch samples for every container on a bounded worker pool
    async fn fetch_all(&self, containers: &[ContainerInfo], now: i64) -> Vec<Fetched> {
        let backfill_secs = (self.config.source.analysis_duration_mins * 60) as i64;
        let step_secs = self.config.windows.sample_interval_secs;
        let semaphore = Arc::new(Semaphore::new(self.config.orchestrator.fetch_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for info in containers {
            let range = fetch::fetch_range(
                self.store.latest_timestamp(&info.identity),
                now,
                backfill_secs,
                step_secs,
            );
            let source = Arc::clone(&self.metrics_source);
            let retry = self.retry.clone();
            let semaphore = Arc::clone(&semaphore);
            let info = info.clone();

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => fetch::fetch_samples(source.as_ref(), &retry, &info, range).await,
                    Err(_) => Err(SourceError::Permanent("fetch pool closed".to_string())),
                };
                (info, result)
            });
        }

        let mut fetched = Vec::with_capacity(containers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(pair) => fetched.push(pair),
                Err(e) => error!(error = %e, "Metric fetch task failed"),
            }
        }
        fetched
    }

    /// Evaluate every rule against the container's current windows
    ///
    /// With `record` set, fresh stuck-process occurrences are folded into
    /// the pattern tracker afterwards.
    fn evaluate_rules(&self, info: &ContainerInfo, record: bool) -> Vec<RuleResult> {
        let windows = self.store.window_set(&info.identity);
        let stuck_state = self.tracker.state(&info.identity, RuleId::StuckProcess);
        let now = self.store.now();
        let ctx = RuleContext {
            windows: &windows,
            stuck_state: &stuck_state,
            memory_limit_bytes: info.memory_limit_bytes,
            now,
            config: &self.config.rules,
            sample_interval_secs: self.config.windows.sample_interval_secs,
            min_coverage: self.config.windows.min_coverage,
        };

        let results = rules::evaluate_all(&ctx);
        if record {
            let evidence = rules::stuck_process_evidence(&ctx);
            self.tracker
                .observe(&info.identity, RuleId::StuckProcess, &evidence, now);
        }
        results
    }

    fn score(&self, info: ContainerInfo, results: Vec<RuleResult>, evaluated_at: i64) -> DetectionResult {
        let mut result = self
            .aggregator
            .aggregate(info.identity, results, evaluated_at);
        result.node_name = info.node_name;
        result
    }

    /// Score one container from its current windows without running a cycle
    ///
    /// Pattern state is read but not advanced. Excluded containers return
    /// the reason instead of a verdict.
    pub fn analyze_container(
        &self,
        info: &ContainerInfo,
    ) -> std::result::Result<DetectionResult, ExclusionReason> {
        if let Some(reason) = self.filter.check(info, self.clock.now()) {
            return Err(reason);
        }
        let results = self.evaluate_rules(info, false);
        Ok(self.score(info.clone(), results, self.store.now()))
    }

    /// Run cycles on the configured interval until shutdown
    ///
    /// Each cycle is bounded by the cycle timeout. A shutdown signal that
    /// arrives mid-cycle abandons it before ingestion.
    pub async fn run_continuous(
        self: Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
        reports: mpsc::Sender<CycleReport>,
    ) {
        let orchestrator = &self.config.orchestrator;
        info!(
            interval_secs = orchestrator.interval_secs,
            timeout_secs = orchestrator.cycle_timeout().as_secs(),
            "Starting continuous detection"
        );

        let mut ticker = interval(orchestrator.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cycle = tokio::time::timeout(orchestrator.cycle_timeout(), self.run_cycle());
                    tokio::select! {
                        finished = cycle => match finished {
                            Ok(report) => {
                                if reports.send(report).await.is_err() {
                                    debug!("Report receiver dropped");
                                }
                            }
                            Err(_) => {
                                warn!(
                                    timeout_secs = orchestrator.cycle_timeout().as_secs(),
                                    "Detection cycle timed out"
                                );
                                self.set_phase(CyclePhase::Idle);
                                self.metrics
                                    .observe_cycle("timed_out", orchestrator.cycle_timeout().as_secs_f64());
                                self.health
                                    .set_degraded(components::DETECTOR, "last cycle timed out")
                                    .await;
                            }
                        },
                        _ = shutdown.recv() => {
                            self.set_phase(CyclePhase::Idle);
                            self.logger.log_shutdown("shutdown signal during cycle");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    self.logger.log_shutdown("shutdown signal");
                    break;
                }
            }
        }
    }
}

/// Builder for [`Detector`]
pub struct DetectorBuilder {
    config: DetectorConfig,
    inventory: Option<Arc<dyn InventorySource>>,
    metrics_source: Option<Arc<dyn MetricsSource>>,
    clock: Option<Arc<dyn Clock>>,
    health: Option<HealthRegistry>,
    cluster_name: String,
}

impl DetectorBuilder {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            inventory: None,
            metrics_source: None,
            clock: None,
            health: None,
            cluster_name: "default".to_string(),
        }
    }

    /// Set the container inventory
    pub fn inventory(mut self, inventory: Arc<dyn InventorySource>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Set the metrics source
    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    /// Override the wall clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a health registry with the HTTP layer
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// Validate the configuration and build the detector
    pub fn build(self) -> Result<Detector> {
        self.config.validate()?;
        let inventory = self
            .inventory
            .ok_or_else(|| anyhow::anyhow!("Inventory source is required"))?;
        let metrics_source = self
            .metrics_source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let orchestrator = &self.config.orchestrator;
        let retry = RetryPolicy::new(
            orchestrator.max_attempts,
            orchestrator.initial_backoff(),
            orchestrator.max_backoff(),
        );
        let stuck_lookback = self.config.rules.stuck_process.lookback_secs as i64;
        let tracker = PatternStateTracker::new(stuck_lookback, [(RuleId::StuckProcess, stuck_lookback)]);
        let history_cycles = orchestrator.history_cycles;

        Ok(Detector {
            inventory,
            metrics_source,
            clock,
            store: MetricWindowStore::new(),
            tracker,
            filter: ExclusionFilter::new(&self.config.exclusion),
            aggregator: ScoringAggregator::new(&self.config.scoring)?,
            retry,
            health: self.health.unwrap_or_default(),
            metrics: DetectorMetrics::new(),
            logger: StructuredLogger::new(self.cluster_name),
            cycles: AtomicU64::new(0),
            phase: Mutex::new(CyclePhase::Idle),
            history: Mutex::new(VecDeque::with_capacity(history_cycles)),
            latest: Mutex::new(None),
            config: self.config,
        })
    }
}
