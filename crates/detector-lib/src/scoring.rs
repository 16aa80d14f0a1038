//! Weighted fusion of rule scores into a 0-100 zombie score

use crate::config::{ConfigError, RuleWeights, ScoringConfig};
use crate::models::{Classification, ContainerIdentity, DetectionResult, RuleId, RuleResult};

/// Combines rule results and applies the classification thresholds
#[derive(Debug, Clone)]
pub struct ScoringAggregator {
    weights: RuleWeights,
    zombie_threshold: f64,
    potential_zombie_threshold: f64,
    renormalize_abstentions: bool,
}

impl ScoringAggregator {
    /// Build from validated scoring settings
    pub fn new(config: &ScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            weights: config.weights.clone(),
            zombie_threshold: config.zombie_threshold,
            potential_zombie_threshold: config.potential_zombie_threshold,
            renormalize_abstentions: config.renormalize_abstentions,
        })
    }

    pub fn weight(&self, rule: RuleId) -> f64 {
        match rule {
            RuleId::SustainedLowCpu => self.weights.sustained_low_cpu,
            RuleId::MemoryLeak => self.weights.memory_leak,
            RuleId::StuckProcess => self.weights.stuck_process,
            RuleId::NetworkTimeout => self.weights.network_timeout,
            RuleId::ResourceImbalance => self.weights.resource_imbalance,
        }
    }

    /// Fuse `results` into a scored, classified verdict
    ///
    /// The score is `100 * sum(w_i * s_i)`. With renormalisation enabled the
    /// sum is divided by the total weight of the rules that did not abstain,
    /// so a container is judged only on the evidence that applies to it.
    /// Abstaining rules contribute nothing either way.
    pub fn aggregate(
        &self,
        container: ContainerIdentity,
        mut results: Vec<RuleResult>,
        evaluated_at: i64,
    ) -> DetectionResult {
        let applicable_weight: f64 = results
            .iter()
            .filter(|r| r.applicable)
            .map(|r| self.weight(r.rule))
            .sum();

        let scale = if !self.renormalize_abstentions {
            100.0
        } else if applicable_weight > 0.0 {
            100.0 / applicable_weight
        } else {
            0.0
        };

        let mut score = 0.0;
        for result in &mut results {
            result.contribution = if result.applicable {
                self.weight(result.rule) * result.score.clamp(0.0, 1.0) * scale
            } else {
                0.0
            };
            score += result.contribution;
        }
        let score = score.clamp(0.0, 100.0);

        DetectionResult {
            container,
            node_name: None,
            score,
            classification: self.classify(score),
            rules: results,
            evaluated_at,
        }
    }

    /// Zombie at or above the zombie threshold, potential zombie at or above
    /// the lower one, otherwise normal
    pub fn classify(&self, score: f64) -> Classification {
        if score >= self.zombie_threshold {
            Classification::Zombie
        } else if score >= self.potential_zombie_threshold {
            Classification::PotentialZombie
        } else {
            Classification::Normal
        }
    }
}
