//! `POST /chat`: route a message to one agent.
//!
//! Agent failures are part of the conversation, not HTTP errors: the handler
//! answers 200 with `status: "error"` and a readable message. Only a malformed
//! body is rejected with 422.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::agents::{truncate_chars, AgentKind, AgentReply, AgentRequest, Source};
use crate::config::{CHAT_MESSAGE_MAX_CHARS, DEFAULT_DIAGRAM_TYPE, SOURCE_PREVIEW_CHARS};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub agent_type: String,
    #[serde(default)]
    pub diagram_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub agent_type: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl ChatResponse {
    fn error(agent_type: String, response: String) -> Self {
        Self {
            response,
            agent_type,
            status: "error",
            sources: None,
            confidence: None,
        }
    }

    fn success(kind: AgentKind, reply: AgentReply) -> Self {
        // Only the retrieval agent reports sources, even when there are none
        let sources = (kind == AgentKind::Rag)
            .then(|| reply.sources.into_iter().map(preview_source).collect());
        Self {
            response: reply.text,
            agent_type: kind.to_string(),
            status: "success",
            sources,
            confidence: reply.confidence,
        }
    }
}

fn preview_source(source: Source) -> Source {
    if source.content.chars().count() <= SOURCE_PREVIEW_CHARS {
        return source;
    }
    Source {
        content: format!("{}...", truncate_chars(&source.content, SOURCE_PREVIEW_CHARS)),
        ..source
    }
}

fn validate(request: &ChatRequest) -> Result<(), AppError> {
    let length = request.message.chars().count();
    if length == 0 || length > CHAT_MESSAGE_MAX_CHARS {
        return Err(AppError::InvalidRequest(format!(
            "message must be between 1 and {} characters",
            CHAT_MESSAGE_MAX_CHARS
        )));
    }
    Ok(())
}

#[instrument(name = "chat::chat", skip_all, fields(agent_type))]
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(request) = payload?;
    validate(&request)?;
    tracing::Span::current().record("agent_type", request.agent_type.as_str());

    let agent = request
        .agent_type
        .parse::<AgentKind>()
        .ok()
        .and_then(|kind| state.agents.get(kind));
    let Some(agent) = agent else {
        let message = format!("Agent {} is not available.", request.agent_type);
        return Ok(Json(ChatResponse::error(request.agent_type, message)));
    };

    let agent_request = AgentRequest {
        message: request.message,
        diagram_type: Some(
            request
                .diagram_type
                .unwrap_or_else(|| DEFAULT_DIAGRAM_TYPE.to_string()),
        ),
    };

    match agent.process(&agent_request).await {
        Ok(reply) => Ok(Json(ChatResponse::success(agent.kind(), reply))),
        Err(e) => {
            tracing::warn!(error = %e, "Agent failed to process message");
            Ok(Json(ChatResponse::error(
                request.agent_type,
                format!("Error processing message: {}", e),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            agent_type: "mcp".to_string(),
            diagram_type: None,
        }
    }

    #[test]
    fn test_validate_message_length() {
        assert!(validate(&request("hi")).is_ok());
        assert!(validate(&request("")).is_err());
        assert!(validate(&request(&"é".repeat(CHAT_MESSAGE_MAX_CHARS))).is_ok());
        assert!(validate(&request(&"a".repeat(CHAT_MESSAGE_MAX_CHARS + 1))).is_err());
    }

    #[test]
    fn test_preview_source_truncates_long_content() {
        let long = Source {
            content: "x".repeat(SOURCE_PREVIEW_CHARS + 10),
            score: 0.9,
            metadata: serde_json::json!({"source_id": "doc"}),
        };
        let preview = preview_source(long);
        assert_eq!(preview.content.len(), SOURCE_PREVIEW_CHARS + 3);
        assert!(preview.content.ends_with("..."));
        assert_eq!(preview.metadata["source_id"], "doc");

        let short = Source {
            content: "short".to_string(),
            score: 0.1,
            metadata: serde_json::Value::Null,
        };
        assert_eq!(preview_source(short.clone()), short);
    }

    #[test]
    fn test_success_only_rag_reports_sources() {
        let plain = ChatResponse::success(AgentKind::Mermaid, AgentReply::text("diagram"));
        let value = serde_json::to_value(plain).unwrap();
        assert!(value.get("sources").is_none());
        assert_eq!(value["status"], "success");

        let rag = ChatResponse::success(
            AgentKind::Rag,
            AgentReply {
                text: "answer".to_string(),
                sources: Vec::new(),
                confidence: Some(0.0),
            },
        );
        let value = serde_json::to_value(rag).unwrap();
        assert_eq!(value["sources"], serde_json::json!([]));
        assert_eq!(value["confidence"], 0.0);
    }
}
