//! Cross-cycle pattern memory for rules that need repetition history
//!
//! A rule reports the timestamps of qualifying occurrences it saw in its
//! window; the tracker keeps those within the rule's lookback so the next
//! evaluation can count repetitions the window itself no longer shows.

use crate::models::{ContainerIdentity, RuleId};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Qualifying occurrences a rule observed during one evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleEvidence {
    /// Unix timestamps (seconds) of each occurrence, ascending
    pub occurrences: Vec<i64>,
}

impl RuleEvidence {
    pub fn new(mut occurrences: Vec<i64>) -> Self {
        occurrences.sort_unstable();
        occurrences.dedup();
        Self { occurrences }
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }
}

/// Repetition history for one (container, rule) pair
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleState {
    /// Occurrence timestamps still inside the lookback, ascending
    pub repetitions: VecDeque<i64>,
    /// Newest occurrence ever recorded, so re-observing a window does not double count
    pub last_occurrence: Option<i64>,
    /// When the container was last observed for this rule
    pub last_observed: Option<i64>,
}

impl RuleState {
    /// Repetitions within `lookback_secs` of `now`
    pub fn count_within(&self, now: i64, lookback_secs: i64) -> usize {
        let cutoff = now.saturating_sub(lookback_secs);
        self.repetitions.iter().filter(|&&ts| ts >= cutoff).count()
    }

    /// Occurrences from `evidence` that are not yet recorded
    pub fn unrecorded<'a>(&self, evidence: &'a RuleEvidence) -> impl Iterator<Item = i64> + 'a {
        let after = self.last_occurrence.unwrap_or(i64::MIN);
        evidence.occurrences.iter().copied().filter(move |&ts| ts > after)
    }

    fn decay(&mut self, cutoff: i64) {
        while let Some(&front) = self.repetitions.front() {
            if front < cutoff {
                self.repetitions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Holds [`RuleState`] per (container, rule)
pub struct PatternStateTracker {
    states: DashMap<(ContainerIdentity, RuleId), RuleState>,
    lookbacks: HashMap<RuleId, i64>,
    default_lookback_secs: i64,
}

impl PatternStateTracker {
    /// Create a tracker with per-rule lookbacks in seconds
    ///
    /// Rules without an explicit lookback use `default_lookback_secs`.
    pub fn new(
        default_lookback_secs: i64,
        lookbacks: impl IntoIterator<Item = (RuleId, i64)>,
    ) -> Self {
        Self {
            states: DashMap::new(),
            lookbacks: lookbacks.into_iter().collect(),
            default_lookback_secs,
        }
    }

    pub fn lookback_secs(&self, rule: RuleId) -> i64 {
        self.lookbacks
            .get(&rule)
            .copied()
            .unwrap_or(self.default_lookback_secs)
    }

    fn longest_lookback_secs(&self) -> i64 {
        self.lookbacks
            .values()
            .copied()
            .chain(std::iter::once(self.default_lookback_secs))
            .max()
            .unwrap_or(self.default_lookback_secs)
    }

    /// Fold new evidence into the state and return the updated snapshot
    ///
    /// Occurrences at or before the last recorded one are ignored, and
    /// repetitions older than the rule's lookback decay away.
    pub fn observe(
        &self,
        container: &ContainerIdentity,
        rule: RuleId,
        evidence: &RuleEvidence,
        now: i64,
    ) -> RuleState {
        let cutoff = now.saturating_sub(self.lookback_secs(rule));
        let mut state = self
            .states
            .entry((container.clone(), rule))
            .or_default();

        let fresh: Vec<i64> = state.unrecorded(evidence).collect();
        for ts in fresh {
            if ts >= cutoff {
                state.repetitions.push_back(ts);
            }
            state.last_occurrence = Some(ts);
        }
        state.decay(cutoff);
        state.last_observed = Some(now);

        state.value().clone()
    }

    /// Current state, or an empty one for an unseen pair
    pub fn state(&self, container: &ContainerIdentity, rule: RuleId) -> RuleState {
        self.states
            .get(&(container.clone(), rule))
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Drop state for containers not observed within the longest lookback
    pub fn gc(&self, now: i64) -> usize {
        let cutoff = now.saturating_sub(self.longest_lookback_secs());
        let before = self.states.len();
        self.states.retain(|(container, rule), state| {
            let keep = state.last_observed.map_or(false, |ts| ts >= cutoff);
            if !keep {
                debug!(container = %container, rule = %rule, "Dropping stale pattern state");
            }
            keep
        });
        before.saturating_sub(self.states.len())
    }

    /// Number of tracked (container, rule) pairs
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 3600;

    fn tracker() -> PatternStateTracker {
        PatternStateTracker::new(HOUR, [(RuleId::StuckProcess, HOUR)])
    }

    fn id() -> ContainerIdentity {
        ContainerIdentity::new("default", "worker", "main")
    }

    #[test]
    fn test_reobserving_same_window_does_not_double_count() {
        let tracker = tracker();
        let evidence = RuleEvidence::new(vec![1000, 2000]);

        tracker.observe(&id(), RuleId::StuckProcess, &evidence, 2100);
        let state = tracker.observe(&id(), RuleId::StuckProcess, &evidence, 2400);

        assert_eq!(state.repetitions.len(), 2);
        assert_eq!(state.last_occurrence, Some(2000));
        assert_eq!(state.last_observed, Some(2400));
    }

    #[test]
    fn test_repetitions_decay_after_lookback() {
        let tracker = tracker();
        tracker.observe(&id(), RuleId::StuckProcess, &RuleEvidence::new(vec![0]), 100);
        tracker.observe(&id(), RuleId::StuckProcess, &RuleEvidence::new(vec![1800]), 1900);

        let state = tracker.observe(&id(), RuleId::StuckProcess, &RuleEvidence::default(), HOUR + 900);

        assert_eq!(state.repetitions, VecDeque::from(vec![1800]));
        assert_eq!(state.count_within(HOUR + 900, HOUR), 1);
    }

    #[test]
    fn test_unseen_pair_has_empty_state() {
        let tracker = tracker();
        let state = tracker.state(&id(), RuleId::StuckProcess);
        assert!(state.repetitions.is_empty());
        assert!(state.last_observed.is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_gc_drops_unobserved_containers() {
        let tracker = tracker();
        let other = ContainerIdentity::new("default", "other", "main");
        tracker.observe(&id(), RuleId::StuckProcess, &RuleEvidence::default(), 0);
        tracker.observe(&other, RuleId::StuckProcess, &RuleEvidence::default(), 3000);

        assert_eq!(tracker.gc(HOUR + 60), 1);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.state(&id(), RuleId::StuckProcess).last_observed.is_none());
    }

    #[test]
    fn test_unrecorded_filters_known_occurrences() {
        let state = RuleState {
            repetitions: VecDeque::from(vec![500]),
            last_occurrence: Some(500),
            last_observed: Some(600),
        };
        let evidence = RuleEvidence::new(vec![900, 300, 500]);
        assert_eq!(state.unrecorded(&evidence).collect::<Vec<_>>(), vec![900]);
    }
}
