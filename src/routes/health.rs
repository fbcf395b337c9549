//! Health check endpoint for container orchestration.
//!
//! The container `HEALTHCHECK` polls this route. It answers 200 as long as the
//! process can serve HTTP and reports which agents came up.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::agents::AgentKind;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub agents_available: Vec<AgentKind>,
    pub environment: String,
    pub timestamp: String,
}

/// Health check handler. Liveness only: unavailable agents do not fail it.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        agents_available: state.agents.available(),
        environment: state.config.environment.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
