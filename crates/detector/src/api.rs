//! HTTP API for health checks, Prometheus metrics and the latest report

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use detector_lib::{
    detector::Detector,
    health::{ComponentStatus, HealthRegistry},
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub detector: Arc<Detector>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, detector: Arc<Detector>) -> Self {
        Self {
            health_registry,
            detector,
        }
    }
}

/// Health check response - returns 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still detecting
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - 200 once the first cycle has finished
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Latest non-skipped cycle report
async fn report(State(state): State<Arc<AppState>>) -> Response {
    match state.detector.latest_report() {
        Some(report) => (StatusCode::OK, Json(report.as_ref().clone())).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "no detection cycle has completed yet"})),
        )
            .into_response(),
    }
}

/// Summaries of recent cycles, oldest first
async fn history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.detector.history())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/report", get(report))
        .route("/history", get(history))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use detector_lib::models::{ContainerIdentity, ContainerInfo};
    use detector_lib::source::{
        InventorySource, MetricKind, MetricsSource, Point, SourceError, TimeRange,
    };
    use detector_lib::DetectorConfig;
    use tower::ServiceExt;

    struct EmptyInventory;

    #[async_trait]
    impl InventorySource for EmptyInventory {
        async fn list_containers(&self) -> Result<Vec<ContainerInfo>, SourceError> {
            Ok(Vec::new())
        }
    }

    struct EmptyMetrics;

    #[async_trait]
    impl MetricsSource for EmptyMetrics {
        async fn query_range(
            &self,
            _container: &ContainerIdentity,
            _metric: MetricKind,
            _range: TimeRange,
        ) -> Result<Vec<Point>, SourceError> {
            Ok(Vec::new())
        }
    }

    async fn state() -> Arc<AppState> {
        let health = HealthRegistry::new();
        health.register_defaults().await;
        let detector = Detector::builder(DetectorConfig::default())
            .inventory(Arc::new(EmptyInventory))
            .metrics_source(Arc::new(EmptyMetrics))
            .health(health.clone())
            .build()
            .unwrap();
        Arc::new(AppState::new(health, Arc::new(detector)))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_not_ready_before_first_cycle() {
        let app = create_router(state().await);

        let (status, body) = get_json(app.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);

        let (status, _) = get_json(app.clone(), "/report").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = get_json(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_report_served_after_cycle() {
        let state = state().await;
        state.detector.run_cycle().await;
        let app = create_router(state);

        let (status, body) = get_json(app.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);

        let (status, body) = get_json(app.clone(), "/report").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cycle"], 1);
        assert_eq!(body["outcome"]["status"], "complete");

        let (status, body) = get_json(app, "/history").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_component_returns_503() {
        let state = state().await;
        state
            .health_registry
            .set_unhealthy("inventory", "connection refused")
            .await;
        let app = create_router(state);

        let (status, body) = get_json(app, "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["components"]["inventory"]["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let state = state().await;
        state.detector.run_cycle().await;
        let app = create_router(state);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("zombie_detector_cycles_total"));
    }
}
