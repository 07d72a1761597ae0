/*!
 * Health and readiness HTTP surface
 *
 * Kubernetes-style probes plus the Prometheus metrics endpoint.
 */

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::info;

use crate::metrics;

/// Shared service state for health checks.
#[derive(Clone)]
pub struct ServiceState {
    pub ready: Arc<AtomicBool>,
    pub workers_initialized: Arc<AtomicUsize>,
    pub worker_count: usize,
}

impl ServiceState {
    pub fn new(worker_count: usize) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            workers_initialized: Arc::new(AtomicUsize::new(0)),
            worker_count,
        }
    }
}

/// Start the HTTP health server.
pub async fn start_health_server(port: u16, state: ServiceState) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health server to {addr}"))?;

    info!("Health server listening on http://{}", addr);
    info!("   - GET /health  - Liveness probe");
    info!("   - GET /ready   - Readiness probe");
    info!("   - GET /metrics - Prometheus metrics");

    axum::serve(listener, app)
        .await
        .context("Health server failed")?;

    Ok(())
}

/// Liveness probe - is the process alive?
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "hookrelay-delivery",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Readiness probe - can this service accept traffic?
async fn readiness_check(State(state): State<ServiceState>) -> (StatusCode, Json<Value>) {
    let is_ready = state.ready.load(Ordering::SeqCst);
    let workers_init = state.workers_initialized.load(Ordering::SeqCst);

    if is_ready {
        (
            StatusCode::OK,
            Json(json!({
                "ready": true,
                "service": "hookrelay-delivery",
                "workers_initialized": workers_init,
                "workers_total": state.worker_count,
                "message": "All worker lanes polling - ready for events"
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "ready": false,
                "service": "hookrelay-delivery",
                "workers_initialized": workers_init,
                "workers_total": state.worker_count,
                "message": format!("Initializing: {}/{} workers ready", workers_init, state.worker_count)
            })),
        )
    }
}

/// Metrics endpoint handler
async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::render_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
