//! Health check handlers

use crate::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub embedding: ProviderCheck,
    pub llm: ProviderCheck,
    pub active_sessions: usize,
}

#[derive(Serialize)]
pub struct ProviderCheck {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Readiness probe - reports the configured providers and live sessions
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        status: "ready".to_string(),
        checks: HealthChecks {
            embedding: ProviderCheck {
                provider: state.config.embedding.provider.clone(),
                model: state.embedder.model_name().to_string(),
                dimension: Some(state.embedder.dimension()),
            },
            llm: ProviderCheck {
                provider: state.config.llm.provider.clone(),
                model: state.llm.model_name().to_string(),
                dimension: None,
            },
            active_sessions: state.sessions.len().await,
        },
    })
}
