//! Health check handlers

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::Value;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: ReadyChecks,
}

#[derive(Serialize)]
pub struct ReadyChecks {
    pub retrieval: Value,
    pub cache: String,
    pub providers: Vec<String>,
    pub available_providers: Vec<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: astrorag_common::VERSION.to_string(),
    })
}

/// Readiness probe - ready while at least one generation provider is out of cooldown
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let (providers, available) = state.pipeline.providers();
    let status = if available.is_empty() { "degraded" } else { "ready" };

    Json(ReadyResponse {
        status: status.to_string(),
        checks: ReadyChecks {
            retrieval: state.pipeline.retriever().describe(),
            cache: state.pipeline.cache_name().to_string(),
            providers,
            available_providers: available,
        },
    })
}
