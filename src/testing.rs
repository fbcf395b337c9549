//! In-process fakes for upstream services used by unit tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::config::{ApiKey, OpenAiConfig};
use crate::llm::OpenAiClient;
use crate::mcp::{McpConnect, McpError, McpSession};

/// How the fake MCP server answers one request
pub enum FakeReply {
    Result(Value),
    Error(i64, String),
    Silent,
}

type Handler = Arc<dyn Fn(&str, &Value) -> FakeReply + Send + Sync>;

/// MCP server running on an in-memory duplex stream
#[derive(Clone)]
pub struct FakeMcp {
    handler: Handler,
    timeout: Duration,
}

impl FakeMcp {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> FakeReply + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl McpConnect for FakeMcp {
    async fn connect(&self) -> Result<McpSession, McpError> {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, mut server_write) = tokio::io::split(server);
        let handler = self.handler.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Ok(message) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                let (Some(id), Some(method)) = (message.get("id"), message["method"].as_str()) else {
                    continue;
                };
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                let reply = match method {
                    "initialize" => FakeReply::Result(serde_json::json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "fake", "version": "0"}
                    })),
                    _ => handler(method, &params),
                };
                let response = match reply {
                    FakeReply::Result(result) => {
                        serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
                    }
                    FakeReply::Error(code, message) => serde_json::json!({
                        "jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}
                    }),
                    FakeReply::Silent => continue,
                };
                let mut out = response.to_string();
                out.push('\n');
                if server_write.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let session = McpSession::from_transport(client_read, client_write, self.timeout);
        session.initialize().await?;
        Ok(session)
    }
}

#[derive(Clone, Default)]
struct FakeOpenAiState {
    replies: Arc<Mutex<VecDeque<Value>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

/// OpenAI-compatible HTTP server returning scripted assistant messages
pub struct FakeOpenAi {
    pub base_url: String,
    state: FakeOpenAiState,
}

impl FakeOpenAi {
    /// Each entry in `replies` is the `message` object of one completion
    pub async fn start(replies: Vec<Value>) -> Self {
        let state = FakeOpenAiState {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        };

        let app = Router::new()
            .route("/chat/completions", post(chat))
            .route("/embeddings", post(embeddings))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Request bodies received so far
    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn client(&self) -> OpenAiClient {
        let config = OpenAiConfig {
            base_url: self.base_url.clone(),
            ..OpenAiConfig::default()
        };
        OpenAiClient::new(&config, ApiKey::new("sk-test")).unwrap()
    }
}

async fn chat(
    State(state): State<FakeOpenAiState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (axum::http::StatusCode, Json<Value>)> {
    state.requests.lock().unwrap().push(body);
    let next = state.replies.lock().unwrap().pop_front();
    match next {
        Some(message) => Ok(Json(serde_json::json!({
            "id": "chatcmpl-test",
            "choices": [{"index": 0, "message": message, "finish_reason": "stop"}]
        }))),
        None => Err((
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": {"message": "no scripted reply left"}})),
        )),
    }
}

/// Embeds each input as `[chars, 1, 0]`
async fn embeddings(State(state): State<FakeOpenAiState>, Json(body): Json<Value>) -> Json<Value> {
    state.requests.lock().unwrap().push(body.clone());
    let data: Vec<Value> = body["input"]
        .as_array()
        .map(|inputs| {
            inputs
                .iter()
                .enumerate()
                .map(|(index, input)| {
                    let len = input.as_str().map(|s| s.chars().count()).unwrap_or(0) as f32;
                    serde_json::json!({"index": index, "embedding": [len, 1.0, 0.0]})
                })
                .collect()
        })
        .unwrap_or_default();
    Json(serde_json::json!({"data": data}))
}

/// Assistant message with plain text content
pub fn text_reply(text: &str) -> Value {
    serde_json::json!({"role": "assistant", "content": text})
}

/// Assistant message asking for one tool call
pub fn tool_call_reply(id: &str, name: &str, arguments: Value) -> Value {
    serde_json::json!({
        "role": "assistant",
        "content": null,
        "tool_calls": [{
            "id": id,
            "type": "function",
            "function": {"name": name, "arguments": arguments.to_string()}
        }]
    })
}
