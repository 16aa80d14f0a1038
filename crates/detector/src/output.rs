//! Report formatting

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use detector_lib::{Classification, CycleOutcome, CycleReport, DetectionResult};
use std::fmt::Write;
use tabled::{settings::Style, Table, Tabled};

/// Report output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    #[default]
    Text,
    /// Full cycle report as JSON
    Json,
}

/// Row for the suspects table
#[derive(Tabled)]
struct SuspectRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Classification")]
    classification: String,
    #[tabled(rename = "Triggered Rules")]
    triggered: String,
}

impl From<&DetectionResult> for SuspectRow {
    fn from(result: &DetectionResult) -> Self {
        let triggered: Vec<&str> = result
            .rules
            .iter()
            .filter(|r| r.triggered)
            .map(|r| r.rule.as_str())
            .collect();
        Self {
            namespace: result.container.namespace.clone(),
            pod: result.container.pod_name.clone(),
            container: result.container.container_name.clone(),
            node: result.node_name.clone().unwrap_or_else(|| "-".to_string()),
            score: format!("{:.1}", result.score),
            classification: color_classification(result.classification),
            triggered: triggered.join(", "),
        }
    }
}

pub fn print_report(report: &CycleReport, format: OutputFormat, details: bool) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", render_text(report, details)),
        OutputFormat::Json => println!("{}", render_json(report)?),
    }
    Ok(())
}

pub fn render_json(report: &CycleReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Table of non-normal containers, optionally followed by rule details
pub fn render_text(report: &CycleReport, details: bool) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} cycle {} at {} ({})",
        "Detection".bold(),
        report.cycle,
        format_timestamp(report.finished_at),
        color_outcome(&report.outcome)
    );
    if let CycleOutcome::Skipped { error } = &report.outcome {
        let _ = writeln!(out, "{} {}", "✗".red().bold(), error);
        return out;
    }
    let _ = writeln!(
        out,
        "Evaluated {} containers, excluded {}, failed {}",
        report.results.len(),
        report.excluded.len(),
        report.failures.len()
    );

    let suspects: Vec<&DetectionResult> = report.results.iter().filter(|r| r.is_suspect()).collect();
    if suspects.is_empty() {
        let _ = writeln!(out, "{} {}", "✓".green().bold(), "No zombie containers detected");
    } else {
        let rows: Vec<SuspectRow> = suspects.iter().map(|r| SuspectRow::from(*r)).collect();
        let table = Table::new(rows).with(Style::rounded()).to_string();
        let _ = writeln!(out, "{}", table);
        let _ = writeln!(
            out,
            "{} zombies, {} potential zombies",
            report.zombie_count(),
            report.potential_zombie_count()
        );
    }

    if details {
        for result in &suspects {
            out.push_str(&render_details(result));
        }
    }

    for failure in &report.failures {
        let _ = writeln!(
            out,
            "{} {}: {}",
            "⚠".yellow().bold(),
            failure.container,
            failure.error
        );
    }
    for change in &report.changes {
        let _ = writeln!(
            out,
            "{} {} changed from {} to {} (score {:.1})",
            "ℹ".blue().bold(),
            change.container,
            change.previous,
            change.current,
            change.score
        );
    }

    out
}

/// Per-rule breakdown for one container
pub fn render_details(result: &DetectionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{} (score {:.1}, {})",
        result.container.to_string().bold(),
        result.score,
        color_classification(result.classification)
    );
    for rule in &result.rules {
        let status = if !rule.applicable {
            "abstained".dimmed().to_string()
        } else if rule.triggered {
            "triggered".red().to_string()
        } else {
            "clear".green().to_string()
        };
        let evidence: Vec<String> = rule
            .evidence
            .iter()
            .map(|(key, value)| format!("{}={}", key, format_value(*value)))
            .collect();
        let _ = write!(
            out,
            "  {:<20} {:<10} score {:.2}  contribution {:.1}",
            rule.rule.as_str(),
            status,
            rule.score,
            rule.contribution
        );
        if let Some(reason) = &rule.reason {
            let _ = write!(out, "  ({})", reason);
        }
        if !evidence.is_empty() {
            let _ = write!(out, "  [{}]", evidence.join(", "));
        }
        out.push('\n');
    }
    out
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.4}", value)
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Color classification by severity
pub fn color_classification(classification: Classification) -> String {
    let label = classification.to_string();
    match classification {
        Classification::Zombie => label.red().bold().to_string(),
        Classification::PotentialZombie => label.yellow().to_string(),
        Classification::Normal => label.green().to_string(),
    }
}

fn color_outcome(outcome: &CycleOutcome) -> String {
    let label = outcome.to_string();
    match outcome {
        CycleOutcome::Complete => label.green().to_string(),
        CycleOutcome::Degraded { .. } => label.yellow().to_string(),
        CycleOutcome::Skipped { .. } => label.red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use detector_lib::detector::FetchFailure;
    use detector_lib::{ContainerIdentity, RuleId, RuleResult};

    fn result(name: &str, score: f64, classification: Classification) -> DetectionResult {
        DetectionResult {
            container: ContainerIdentity::new("shop", format!("{}-5c8d", name), name),
            node_name: Some("node-a".to_string()),
            score,
            classification,
            rules: vec![
                RuleResult::triggered(RuleId::SustainedLowCpu, 0.9).with_evidence("mean_cpu", 0.01),
                RuleResult::abstain(RuleId::MemoryLeak, "memory not growing"),
            ],
            evaluated_at: 1_700_000_000,
        }
    }

    fn report() -> CycleReport {
        CycleReport {
            cycle: 7,
            started_at: 1_700_000_000,
            finished_at: 1_700_000_002,
            outcome: CycleOutcome::Degraded {
                failed_containers: 1,
            },
            results: vec![
                result("idle", 88.9, Classification::Zombie),
                result("quiet", 45.0, Classification::PotentialZombie),
                result("api", 0.0, Classification::Normal),
            ],
            excluded: Vec::new(),
            failures: vec![FetchFailure {
                container: ContainerIdentity::new("shop", "broken-1", "broken"),
                error: "bad query".to_string(),
            }],
            changes: Vec::new(),
        }
    }

    #[test]
    fn test_text_lists_only_suspects() {
        colored::control::set_override(false);
        let text = render_text(&report(), false);

        assert!(text.contains("cycle 7"));
        assert!(text.contains("idle-5c8d"));
        assert!(text.contains("quiet-5c8d"));
        assert!(!text.contains("api-5c8d"));
        assert!(text.contains("88.9"));
        assert!(text.contains("1 zombies, 1 potential zombies"));
        assert!(text.contains("shop/broken-1/broken: bad query"));
        assert!(!text.contains("mean_cpu"));
    }

    #[test]
    fn test_details_include_evidence() {
        colored::control::set_override(false);
        let text = render_text(&report(), true);

        assert!(text.contains("sustained_low_cpu"));
        assert!(text.contains("mean_cpu=0.0100"));
        assert!(text.contains("(memory not growing)"));
    }

    #[test]
    fn test_skipped_cycle_shows_error() {
        colored::control::set_override(false);
        let mut report = report();
        report.outcome = CycleOutcome::Skipped {
            error: "inventory unavailable: timeout".to_string(),
        };
        report.results.clear();

        let text = render_text(&report, false);
        assert!(text.contains("inventory unavailable: timeout"));
        assert!(!text.contains("Evaluated"));
    }

    #[test]
    fn test_json_is_complete_report() {
        let json = render_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["cycle"], 7);
        assert_eq!(value["outcome"]["status"], "degraded");
        assert_eq!(value["outcome"]["failed_containers"], 1);
        assert_eq!(value["results"].as_array().unwrap().len(), 3);
        assert_eq!(value["results"][0]["classification"], "zombie");
    }
}
