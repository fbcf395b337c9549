//! Bridge to an external Flowise prediction endpoint.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;
use uuid::Uuid;

use super::{Agent, AgentError, AgentKind, AgentReply, AgentRequest};
use crate::config::ExternoConfig;

pub struct ExternoAgent {
    http: reqwest::Client,
    url: String,
    /// Flowise keeps conversational memory per session id
    session_id: RwLock<String>,
}

impl ExternoAgent {
    pub fn new(url: impl Into<String>, config: &ExternoConfig) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
            session_id: RwLock::new(Uuid::new_v4().to_string()),
        })
    }

    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Agent for ExternoAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Externo
    }

    #[instrument(name = "agent.externo.process", skip_all)]
    async fn process(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let response = self
            .http
            .post(&self.url)
            .json(&serde_json::json!({
                "question": request.message,
                "overrideConfig": { "sessionId": self.session_id() },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response.json().await?;
        let text = prediction_text(&body).ok_or_else(|| AgentError::Upstream {
            status: status.as_u16(),
            message: "prediction response had no text".to_string(),
        })?;
        Ok(AgentReply::text(text))
    }

    async fn reset(&self) {
        let mut session = self
            .session_id
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *session = Uuid::new_v4().to_string();
    }
}

/// Answer text from a Flowise prediction body
fn prediction_text(body: &Value) -> Option<String> {
    match body {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => match map.get("text") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => map.get("json").map(|json| json.to_string()),
        },
        _ => None,
    }
}
