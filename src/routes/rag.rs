//! `POST /rag/knowledge`: feed documents into the retrieval agent.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::agents::AgentKind;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct KnowledgeRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KnowledgeResponse {
    pub status: &'static str,
    pub message: String,
    pub chunks: usize,
}

/// What a knowledge request asks for, after blank fields are discarded
#[derive(Debug, PartialEq)]
enum KnowledgeInput<'a> {
    Url(&'a str),
    Text { text: &'a str, source_id: &'a str },
}

impl KnowledgeRequest {
    fn input(&self) -> Option<KnowledgeInput<'_>> {
        fn present(field: &Option<String>) -> Option<&str> {
            field
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
        }

        if let Some(url) = present(&self.url) {
            return Some(KnowledgeInput::Url(url));
        }
        match (present(&self.text), present(&self.source_id)) {
            (Some(text), Some(source_id)) => Some(KnowledgeInput::Text { text, source_id }),
            _ => None,
        }
    }
}

#[instrument(name = "rag::add_knowledge", skip_all)]
pub async fn add_knowledge(
    State(state): State<AppState>,
    payload: Result<Json<KnowledgeRequest>, JsonRejection>,
) -> Result<Json<KnowledgeResponse>, AppError> {
    let Json(request) = payload?;

    let agent = state
        .agents
        .get(AgentKind::Rag)
        .ok_or_else(|| AppError::AgentUnavailable("RAG agent is not available".to_string()))?;
    let knowledge = agent
        .knowledge_base()
        .ok_or_else(|| AppError::AgentUnavailable("RAG agent is not available".to_string()))?;

    let (chunks, origin) = match request.input() {
        Some(KnowledgeInput::Url(url)) => (knowledge.add_from_url(url).await?, url),
        Some(KnowledgeInput::Text { text, source_id }) => {
            (knowledge.add_from_text(text, source_id).await?, source_id)
        }
        None => {
            return Err(AppError::BadRequest(
                "Either url or text with source_id is required".to_string(),
            ))
        }
    };

    tracing::info!(origin = %origin, chunks, "Knowledge added");
    Ok(Json(KnowledgeResponse {
        status: "success",
        message: format!("Knowledge added from: {}", origin),
        chunks,
    }))
}
