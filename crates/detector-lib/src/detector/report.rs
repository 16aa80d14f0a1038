//! Per-cycle report types

use crate::exclusion::ExclusionReason;
use crate::models::{Classification, ContainerIdentity, DetectionResult};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Where the orchestrator is within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    FetchingInventory,
    Filtering,
    FetchingMetrics,
    Evaluating,
    Aggregating,
    Reporting,
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Every eligible container was evaluated
    Complete,
    /// Some containers could not be fetched or ingested
    Degraded { failed_containers: usize },
    /// Collaborators were unreachable; no state was changed
    Skipped { error: String },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Complete => "complete",
            CycleOutcome::Degraded { .. } => "degraded",
            CycleOutcome::Skipped { .. } => "skipped",
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleOutcome::Skipped { .. })
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Complete => write!(f, "complete"),
            CycleOutcome::Degraded { failed_containers } => {
                write!(f, "degraded ({} containers failed)", failed_containers)
            }
            CycleOutcome::Skipped { error } => write!(f, "skipped: {}", error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcludedContainer {
    pub container: ContainerIdentity,
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchFailure {
    pub container: ContainerIdentity,
    pub error: String,
}

/// A container whose classification differs from the previous cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationChange {
    pub container: ContainerIdentity,
    pub previous: Classification,
    pub current: Classification,
    pub score: f64,
}

/// Everything one cycle produced
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: i64,
    pub finished_at: i64,
    pub outcome: CycleOutcome,
    /// Sorted by descending score
    pub results: Vec<DetectionResult>,
    pub excluded: Vec<ExcludedContainer>,
    pub failures: Vec<FetchFailure>,
    pub changes: Vec<ClassificationChange>,
}

impl CycleReport {
    pub(crate) fn skipped(cycle: u64, started_at: i64, finished_at: i64, error: String) -> Self {
        Self {
            cycle,
            started_at,
            finished_at,
            outcome: CycleOutcome::Skipped { error },
            results: Vec::new(),
            excluded: Vec::new(),
            failures: Vec::new(),
            changes: Vec::new(),
        }
    }

    pub fn with_classification(
        &self,
        classification: Classification,
    ) -> impl Iterator<Item = &DetectionResult> {
        self.results
            .iter()
            .filter(move |r| r.classification == classification)
    }

    pub fn zombie_count(&self) -> usize {
        self.with_classification(Classification::Zombie).count()
    }

    pub fn potential_zombie_count(&self) -> usize {
        self.with_classification(Classification::PotentialZombie)
            .count()
    }

    pub fn result_for(&self, container: &ContainerIdentity) -> Option<&DetectionResult> {
        self.results.iter().find(|r| &r.container == container)
    }
}

/// Condensed cycle record kept for continuous-mode diffing
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub finished_at: i64,
    pub outcome: String,
    pub evaluated: usize,
    pub zombies: usize,
    pub potential_zombies: usize,
    #[serde(skip)]
    pub(crate) classifications: HashMap<ContainerIdentity, Classification>,
}

impl CycleSummary {
    pub(crate) fn from_report(report: &CycleReport) -> Self {
        Self {
            cycle: report.cycle,
            finished_at: report.finished_at,
            outcome: report.outcome.label().to_string(),
            evaluated: report.results.len(),
            zombies: report.zombie_count(),
            potential_zombies: report.potential_zombie_count(),
            classifications: report
                .results
                .iter()
                .map(|r| (r.container.clone(), r.classification))
                .collect(),
        }
    }

    pub fn classification_of(&self, container: &ContainerIdentity) -> Option<Classification> {
        self.classifications.get(container).copied()
    }
}

/// Changes between the previous evaluated cycle and `results`
///
/// Containers seen for the first time count as changed only when they are
/// already suspects.
pub(crate) fn diff_classifications(
    previous: Option<&CycleSummary>,
    results: &[DetectionResult],
) -> Vec<ClassificationChange> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|r| {
            let before = previous
                .classification_of(&r.container)
                .unwrap_or(Classification::Normal);
            (before != r.classification).then(|| ClassificationChange {
                container: r.container.clone(),
                previous: before,
                current: r.classification,
                score: r.score,
            })
        })
        .collect()
}
