//! OpenAI-compatible chat completion and embedding client.
//!
//! A thin `reqwest` wrapper shared by every agent. Tool calling is passed
//! through unchanged so callers can drive their own tool loops.

mod types;

pub use types::{ChatMessage, ChatOptions, FunctionCall, Role, ToolCall, ToolDefinition};

use std::time::Duration;

use tracing::instrument;

use crate::config::{ApiKey, OpenAiConfig};
use types::{
    ApiErrorBody, ChatCompletionRequest, ChatCompletionResponse, EmbeddingRequest,
    EmbeddingResponse,
};

/// Error type for LLM API calls
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned no choices")]
    EmptyResponse,

    #[error("LLM returned {got} embeddings for {expected} inputs")]
    EmbeddingCount { expected: usize, got: usize },
}

impl LlmError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LlmError::Http(e) if e.is_timeout())
    }
}

/// Client for a single OpenAI-compatible endpoint
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: ApiKey,
    model: String,
    embedding_model: String,
    defaults: ChatOptions,
}

impl OpenAiClient {
    pub fn new(config: &OpenAiConfig, api_key: ApiKey) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            defaults: ChatOptions {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
        })
    }

    /// Configured sampling options
    pub fn default_options(&self) -> ChatOptions {
        self.defaults
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Request one completion and return the first choice's message.
    #[instrument(
        name = "llm.chat",
        skip(self, messages, tools),
        fields(model = %self.model, messages = messages.len(), tools = tools.len())
    )]
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: ChatOptions,
    ) -> Result<ChatMessage, LlmError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            tools,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let completion: ChatCompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)
    }

    /// Convenience for a single system + user exchange without tools
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        options: ChatOptions,
    ) -> Result<String, LlmError> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let reply = self.chat(&messages, &[], options).await?;
        Ok(reply.text().to_string())
    }

    /// Embed each input, returning vectors in input order.
    #[instrument(name = "llm.embed", skip(self, inputs), fields(model = %self.embedding_model, inputs = inputs.len()))]
    pub async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: inputs,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut body: EmbeddingResponse = response.json().await?;
        if body.data.len() != inputs.len() {
            return Err(LlmError::EmbeddingCount {
                expected: inputs.len(),
                got: body.data.len(),
            });
        }
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Turn non-2xx responses into `LlmError::Api`, preferring the API's own message
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    Err(LlmError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{text_reply, tool_call_reply, FakeOpenAi};

    #[tokio::test]
    async fn test_chat_sends_tools_and_returns_tool_calls() {
        let fake = FakeOpenAi::start(vec![tool_call_reply(
            "call_1",
            "firecrawl_scrape",
            serde_json::json!({"url": "https://example.com"}),
        )])
        .await;
        let client = fake.client();
        let tools = [ToolDefinition::function(
            "firecrawl_scrape".to_string(),
            Some("Scrape".to_string()),
            serde_json::json!({"type": "object"}),
        )];

        let reply = client
            .chat(&[ChatMessage::user("scrape it")], &tools, client.default_options())
            .await
            .unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].function.name, "firecrawl_scrape");

        let sent = &fake.requests()[0];
        assert_eq!(sent["model"], client.model());
        assert_eq!(sent["tools"][0]["function"]["name"], "firecrawl_scrape");
    }

    #[tokio::test]
    async fn test_complete_omits_empty_tools() {
        let fake = FakeOpenAi::start(vec![text_reply("pong")]).await;
        let client = fake.client();

        let text = client
            .complete("system", "ping", client.default_options())
            .await
            .unwrap();
        assert_eq!(text, "pong");
        assert!(fake.requests()[0].get("tools").is_none());
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let fake = FakeOpenAi::start(vec![]).await;
        let client = fake.client();

        let err = client
            .complete("system", "ping", client.default_options())
            .await
            .unwrap_err();
        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "no scripted reply left");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_embed_keeps_input_order() {
        let fake = FakeOpenAi::start(vec![]).await;
        let client = fake.client();

        let vectors = client
            .embed(&["a".to_string(), "abc".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0, 0.0], vec![3.0, 1.0, 0.0]]);
        assert!(client.embed(&[]).await.unwrap().is_empty());
    }
}
