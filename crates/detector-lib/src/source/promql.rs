//! Prometheus range-query adapter

use super::{MetricKind, MetricsSource, Point, SourceError, TimeRange};
use crate::config::{QueryTemplates, SourceConfig};
use crate::models::ContainerIdentity;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// `/api/v1/query_range` client with one PromQL template per metric
pub struct PrometheusSource {
    client: Client,
    base_url: Url,
    queries: QueryTemplates,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    #[serde(default)]
    values: Vec<(f64, String)>,
}

impl PrometheusSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SourceError::Permanent(format!("failed to create HTTP client: {}", e)))?;

        let mut base_url = Url::parse(&config.prometheus_url).map_err(|e| {
            SourceError::Permanent(format!("invalid Prometheus URL {}: {}", config.prometheus_url, e))
        })?;
        // Url::join replaces the last path segment unless the base ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            queries: config.queries.clone(),
        })
    }

    /// PromQL for one container's metric with placeholders filled in
    pub fn render_query(&self, container: &ContainerIdentity, metric: MetricKind, step_secs: u64) -> String {
        let template = match metric {
            MetricKind::Cpu => &self.queries.cpu,
            MetricKind::Memory => &self.queries.memory,
            MetricKind::NetworkBytes => &self.queries.network_bytes,
            MetricKind::ConnectionAttempts => &self.queries.connection_attempts,
        };
        template
            .replace("{namespace}", &container.namespace)
            .replace("{pod}", &container.pod_name)
            .replace("{container}", &container.container_name)
            .replace("{step}", &step_secs.to_string())
    }

    async fn query(&self, promql: &str, range: TimeRange) -> Result<Vec<Point>, SourceError> {
        let url = self
            .base_url
            .join("api/v1/query_range")
            .map_err(|e| SourceError::Permanent(format!("invalid query URL: {}", e)))?;

        let params = [
            ("query", promql.to_string()),
            ("start", range.start.to_string()),
            ("end", range.end.to_string()),
            ("step", format!("{}s", range.step_secs.max(1))),
        ];

        let response = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_request_error)?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::Transient(format!("Prometheus returned {}: {}", status, body)));
        }

        let parsed: QueryResponse = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                SourceError::Permanent(format!("malformed Prometheus response: {}", e))
            } else {
                SourceError::Permanent(format!("Prometheus returned {}: {}", status, body))
            }
        })?;

        if !status.is_success() || parsed.status != "success" {
            return Err(SourceError::Permanent(format!(
                "query failed ({}): {}",
                status,
                parsed.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }

        Ok(merge_series(parsed.data.map(|d| d.result).unwrap_or_default()))
    }
}

/// Sum every returned series per timestamp, skipping non-finite values
fn merge_series(series: Vec<RangeSeries>) -> Vec<Point> {
    let mut merged: BTreeMap<i64, f64> = BTreeMap::new();
    for s in series {
        for (ts, raw) in s.values {
            let Ok(value) = raw.parse::<f64>() else {
                continue;
            };
            if value.is_finite() {
                *merged.entry(ts.round() as i64).or_insert(0.0) += value;
            }
        }
    }
    merged.into_iter().collect()
}

fn classify_request_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        SourceError::Transient(e.to_string())
    } else {
        SourceError::Permanent(e.to_string())
    }
}

#[async_trait]
impl MetricsSource for PrometheusSource {
    async fn query_range(
        &self,
        container: &ContainerIdentity,
        metric: MetricKind,
        range: TimeRange,
    ) -> Result<Vec<Point>, SourceError> {
        let promql = self.render_query(container, metric, range.step_secs);
        let points = self.query(&promql, range).await?;
        debug!(
            container = %container,
            metric = %metric,
            points = points.len(),
            "Fetched metric range"
        );
        Ok(points)
    }
}
