//! Command-line overrides on top of the layered detector configuration

use crate::Cli;
use anyhow::{Context, Result};
use detector_lib::DetectorConfig;

/// Load file and environment settings, apply flags, then validate
pub fn resolve(cli: &Cli) -> Result<DetectorConfig> {
    let mut config =
        DetectorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    apply_overrides(&mut config, cli);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Flags win over every other source
pub fn apply_overrides(config: &mut DetectorConfig, cli: &Cli) {
    if let Some(url) = &cli.prometheus_url {
        config.source.prometheus_url = url.clone();
    }
    if let Some(minutes) = cli.duration {
        config.source.analysis_duration_mins = minutes;
    }
    if let Some(threshold) = cli.threshold {
        config.scoring.zombie_threshold = threshold;
    }
    for namespace in &cli.exclude_namespaces {
        let namespace = namespace.trim();
        if !namespace.is_empty() && !config.exclusion.namespaces.iter().any(|n| n == namespace) {
            config.exclusion.namespaces.push(namespace.to_string());
        }
    }
    if cli.continuous {
        config.orchestrator.continuous = true;
    }
    if let Some(interval) = cli.interval {
        config.orchestrator.interval_secs = interval;
    }
}
