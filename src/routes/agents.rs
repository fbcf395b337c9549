//! Agent introspection and control endpoints.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use tracing::instrument;

use crate::agents::registry::AgentInfo;
use crate::agents::AgentKind;
use crate::error::AppError;
use crate::mcp::{check_tools_availability, ToolAvailability};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AgentsInfoResponse {
    pub agents: Vec<AgentInfo>,
}

pub async fn info(State(state): State<AppState>) -> Json<AgentsInfoResponse> {
    Json(AgentsInfoResponse {
        agents: state.agents.info(),
    })
}

pub async fn status(State(state): State<AppState>) -> Json<BTreeMap<AgentKind, String>> {
    Json(state.agents.status())
}

/// Forget the conversation held by one agent
#[instrument(name = "agents::reset", skip(state))]
pub async fn reset(
    State(state): State<AppState>,
    Path(agent_type): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let kind: AgentKind = agent_type
        .parse()
        .map_err(|e: crate::agents::UnknownAgent| AppError::NotFound(e.to_string()))?;
    let agent = state
        .agents
        .get(kind)
        .ok_or_else(|| AppError::AgentUnavailable(format!("Agent {} is not available.", kind)))?;

    agent.reset().await;
    tracing::info!(agent = %kind, "Conversation reset");
    Ok(Json(serde_json::json!({
        "status": "success",
        "message": format!("Conversation reset for agent {}", kind),
    })))
}

/// Report which tools the Firecrawl MCP server exposes
#[instrument(name = "agents::mcp_tools", skip(state))]
pub async fn mcp_tools(State(state): State<AppState>) -> Result<Json<ToolAvailability>, AppError> {
    let server = state
        .agents
        .tool_server()
        .ok_or_else(|| AppError::AgentUnavailable("Firecrawl MCP is not configured".to_string()))?;
    Ok(Json(check_tools_availability(server.as_ref()).await))
}
