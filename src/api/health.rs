//! Liveness and provider-status endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/llm/status", get(llm_status))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Debug, Serialize)]
struct LlmStatusResponse {
    provider: &'static str,
    configured: bool,
    message: &'static str,
}

async fn llm_status(State(state): State<AppState>) -> Json<LlmStatusResponse> {
    let provider = state.pipeline.provider();
    let configured = provider.is_configured();
    Json(LlmStatusResponse {
        provider: provider.name(),
        configured,
        message: if configured { "Ready" } else { "Key missing" },
    })
}
