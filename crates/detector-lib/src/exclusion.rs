//! Policy filter applied before any rule sees a container

use crate::config::ExclusionConfig;
use crate::models::ContainerInfo;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Why a container was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    Namespace { namespace: String },
    TooYoung { age_secs: i64, min_age_secs: i64 },
    OptOutLabel { key: String },
    BatchWorkload { owner_kind: String },
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Namespace { namespace } => {
                write!(f, "namespace {} is excluded", namespace)
            }
            ExclusionReason::TooYoung {
                age_secs,
                min_age_secs,
            } => write!(f, "age {}s is below {}s", age_secs, min_age_secs),
            ExclusionReason::OptOutLabel { key } => write!(f, "opted out via label {}", key),
            ExclusionReason::BatchWorkload { owner_kind } => {
                write!(f, "owned by batch workload {}", owner_kind)
            }
        }
    }
}

/// Checks containers against namespace, age, label and owner policy
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    namespaces: HashSet<String>,
    min_age_secs: i64,
    label_key: String,
    label_value: String,
    batch_owner_kinds: Option<HashSet<String>>,
}

impl ExclusionFilter {
    pub fn new(config: &ExclusionConfig) -> Self {
        Self {
            namespaces: config.namespaces.iter().cloned().collect(),
            min_age_secs: config.min_age_secs as i64,
            label_key: config.label_key.clone(),
            label_value: config.label_value.clone(),
            batch_owner_kinds: config
                .exclude_batch_jobs
                .then(|| config.batch_owner_kinds.iter().cloned().collect()),
        }
    }

    /// First matching exclusion, checked in namespace, age, label, owner order
    pub fn check(&self, container: &ContainerInfo, now: i64) -> Option<ExclusionReason> {
        let namespace = &container.identity.namespace;
        if self.namespaces.contains(namespace) {
            return Some(ExclusionReason::Namespace {
                namespace: namespace.clone(),
            });
        }

        let age = container.age_secs(now);
        if age < self.min_age_secs {
            return Some(ExclusionReason::TooYoung {
                age_secs: age,
                min_age_secs: self.min_age_secs,
            });
        }

        let opted_out = |labels: &std::collections::BTreeMap<String, String>| {
            labels
                .get(&self.label_key)
                .map_or(false, |v| *v == self.label_value)
        };
        if opted_out(&container.pod_labels) || opted_out(&container.container_labels) {
            return Some(ExclusionReason::OptOutLabel {
                key: self.label_key.clone(),
            });
        }

        if let (Some(kinds), Some(owner)) = (&self.batch_owner_kinds, &container.owner_kind) {
            if kinds.contains(owner) {
                return Some(ExclusionReason::BatchWorkload {
                    owner_kind: owner.clone(),
                });
            }
        }

        None
    }

    pub fn is_excluded(&self, container: &ContainerInfo, now: i64) -> bool {
        self.check(container, now).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContainerIdentity;

    const NOW: i64 = 1_700_000_000;

    fn container(namespace: &str, age_secs: i64) -> ContainerInfo {
        ContainerInfo::new(ContainerIdentity::new(namespace, "pod", "app"), NOW - age_secs)
    }

    #[test]
    fn test_default_namespaces_excluded() {
        let filter = ExclusionFilter::new(&ExclusionConfig::default());
        for ns in ["kube-system", "kube-public", "kube-node-lease", "monitoring"] {
            assert!(matches!(
                filter.check(&container(ns, 3600), NOW),
                Some(ExclusionReason::Namespace { .. })
            ));
        }
        assert!(filter.check(&container("default", 3600), NOW).is_none());
    }

    #[test]
    fn test_young_container_excluded() {
        let filter = ExclusionFilter::new(&ExclusionConfig::default());
        assert_eq!(
            filter.check(&container("default", 599), NOW),
            Some(ExclusionReason::TooYoung {
                age_secs: 599,
                min_age_secs: 600
            })
        );
        assert!(!filter.is_excluded(&container("default", 600), NOW));
    }

    #[test]
    fn test_label_opt_out_on_pod_or_container() {
        let filter = ExclusionFilter::new(&ExclusionConfig::default());

        let mut pod_labelled = container("default", 3600);
        pod_labelled
            .pod_labels
            .insert("zombie-detection.exclude".to_string(), "true".to_string());
        assert!(filter.is_excluded(&pod_labelled, NOW));

        let mut container_labelled = container("default", 3600);
        container_labelled
            .container_labels
            .insert("zombie-detection.exclude".to_string(), "true".to_string());
        assert!(filter.is_excluded(&container_labelled, NOW));

        // Label values match exactly
        let mut capitalised = container("default", 3600);
        capitalised
            .pod_labels
            .insert("zombie-detection.exclude".to_string(), "True".to_string());
        assert!(!filter.is_excluded(&capitalised, NOW));

        let mut other_value = container("default", 3600);
        other_value
            .pod_labels
            .insert("zombie-detection.exclude".to_string(), "false".to_string());
        assert!(!filter.is_excluded(&other_value, NOW));
    }

    #[test]
    fn test_batch_owners_only_when_enabled() {
        let mut job = container("default", 3600);
        job.owner_kind = Some("Job".to_string());

        let default_filter = ExclusionFilter::new(&ExclusionConfig::default());
        assert!(!default_filter.is_excluded(&job, NOW));

        let filter = ExclusionFilter::new(&ExclusionConfig {
            exclude_batch_jobs: true,
            ..ExclusionConfig::default()
        });
        assert_eq!(
            filter.check(&job, NOW),
            Some(ExclusionReason::BatchWorkload {
                owner_kind: "Job".to_string()
            })
        );
    }

    #[test]
    fn test_first_match_wins() {
        let filter = ExclusionFilter::new(&ExclusionConfig::default());
        let young_system = container("kube-system", 10);
        assert!(matches!(
            filter.check(&young_system, NOW),
            Some(ExclusionReason::Namespace { .. })
        ));
    }
}
