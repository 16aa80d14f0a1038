//! Zombie Detector - finds containers that hold resources while doing no work
//!
//! Runs one detection cycle and prints the report, or keeps running in
//! continuous mode with health and metrics endpoints.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use detector_lib::{
    detector::Detector,
    health::HealthRegistry,
    observability::StructuredLogger,
    source::{KubeInventory, PrometheusSource},
    CycleOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod output;

const DETECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Zombie container detector
#[derive(Debug, Parser)]
#[command(name = "zombie-detector")]
#[command(author, version, about = "Detects zombie containers in a Kubernetes cluster", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "ZOMBIE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Prometheus base URL
    #[arg(long, env = "PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    /// Minutes of history to analyse for newly seen containers
    #[arg(long, value_name = "MINUTES")]
    pub duration: Option<u64>,

    /// Score at or above which a container is reported as a zombie
    #[arg(long, value_name = "SCORE")]
    pub threshold: Option<f64>,

    /// Extra namespaces to skip, comma separated
    #[arg(long, value_delimiter = ',')]
    pub exclude_namespaces: Vec<String>,

    /// Report format
    #[arg(long, short, value_enum, default_value = "text")]
    pub output: output::OutputFormat,

    /// Keep running, one cycle per interval
    #[arg(long)]
    pub continuous: bool,

    /// Seconds between cycles in continuous mode
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Show per-rule scores and evidence for suspect containers
    #[arg(long)]
    pub details: bool,

    /// Port for /healthz, /readyz, /metrics and /report in continuous mode
    #[arg(long, env = "ZOMBIE_API_PORT", default_value = "8080")]
    pub api_port: u16,

    /// Cluster name attached to log events
    #[arg(long, env = "CLUSTER_NAME", default_value = "default")]
    pub cluster_name: String,

    /// Log line format; auto uses JSON in continuous mode
    #[arg(long, value_enum, default_value = "auto")]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Auto,
    Json,
    Text,
}

fn init_tracing(format: LogFormat, continuous: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = match format {
        LogFormat::Auto => continuous,
        LogFormat::Json => true,
        LogFormat::Text => false,
    };

    // Logs go to stderr; stdout carries only the report
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::resolve(&cli)?;
    let continuous = config.orchestrator.continuous;
    init_tracing(cli.log_format, continuous);

    let logger = StructuredLogger::new(&cli.cluster_name);
    logger.log_startup(
        DETECTOR_VERSION,
        if continuous { "continuous" } else { "single-shot" },
    );

    let inventory = KubeInventory::try_default()
        .await
        .context("failed to connect to Kubernetes")?;
    let metrics_source =
        PrometheusSource::new(&config.source).context("failed to configure Prometheus source")?;
    info!(prometheus_url = %config.source.prometheus_url, "Detector configured");

    let health = HealthRegistry::new();
    health.register_defaults().await;

    let detector = Arc::new(
        Detector::builder(config)
            .inventory(Arc::new(inventory))
            .metrics_source(Arc::new(metrics_source))
            .health(health.clone())
            .cluster_name(&cli.cluster_name)
            .build()?,
    );

    if !continuous {
        let report = detector.run_cycle().await;
        output::print_report(&report, cli.output, cli.details)?;
        if let CycleOutcome::Skipped { error } = &report.outcome {
            anyhow::bail!("detection cycle skipped: {}", error);
        }
        return Ok(());
    }

    let app_state = Arc::new(api::AppState::new(health, detector.clone()));
    let api_handle = tokio::spawn(api::serve(cli.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (report_tx, mut report_rx) = mpsc::channel(4);
    let detector_handle = tokio::spawn(detector.run_continuous(shutdown_rx, report_tx));

    let (format, details) = (cli.output, cli.details);
    let printer = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            if let Err(e) = output::print_report(&report, format, details) {
                warn!(error = %e, "Failed to print report");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    let _ = shutdown_tx.send(());

    detector_handle.await?;
    printer.await?;
    api_handle.abort();
    info!("Shutdown complete");

    Ok(())
}
