//! Zombie container detection engine
//!
//! This crate provides the core functionality for:
//! - Time-windowed per-container metric storage
//! - Five heuristic rules and weighted score fusion
//! - Policy-based exclusion of system and opted-out workloads
//! - Detection cycle orchestration over Kubernetes and Prometheus
//! - Health checks and observability

pub mod config;
pub mod detector;
pub mod exclusion;
pub mod health;
pub mod models;
pub mod observability;
pub mod pattern;
pub mod rules;
pub mod scoring;
pub mod source;
pub mod window;

pub use config::{ConfigError, DetectorConfig};
pub use detector::{Clock, CycleOutcome, CycleReport, Detector, DetectorBuilder, SystemClock};
pub use exclusion::{ExclusionFilter, ExclusionReason};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DetectorMetrics, StructuredLogger};
pub use pattern::PatternStateTracker;
pub use scoring::ScoringAggregator;
pub use window::{Granularity, MetricWindowStore};
