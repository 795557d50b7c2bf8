//! Health check handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub redis: String,
    pub script_exists: bool,
    pub api_key_required: bool,
    pub webhook_configured: bool,
}

/// Liveness probe; always 200, with component state in the body.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.orchestrator.health().await;

    Json(HealthResponse {
        status: if report.is_healthy() { "ok" } else { "degraded" }.to_string(),
        redis: if report.store { "ok" } else { "error" }.to_string(),
        script_exists: report.script_exists,
        api_key_required: state.config.api_key_required(),
        webhook_configured: report.webhook_configured,
    })
}
