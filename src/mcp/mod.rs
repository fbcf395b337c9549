//! Model Context Protocol client over stdio.
//!
//! An MCP server (here `firecrawl-mcp`) runs as a child process and speaks
//! newline-delimited JSON-RPC on its stdin/stdout. `McpSession` writes
//! requests under a lock and a background reader task routes each response
//! back to the waiting caller through a oneshot channel keyed by request id.
//! Every request is bounded by the session timeout.
//!
//! Sessions are short-lived: agents open one per chat message and drop it
//! afterwards, which kills the child process.

pub mod messages;

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::config::{ApiKey, FirecrawlConfig, MCP_CLIENT_NAME, MCP_PROTOCOL_VERSION};

pub use messages::{McpTool, ToolOutput};
use messages::{
    CallToolResult, IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult,
};

/// Error type for MCP operations
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Failed to start MCP server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("MCP transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MCP message encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP request '{method}' timed out after {seconds}s")]
    Timeout { method: String, seconds: u64 },

    #[error("MCP server closed the connection")]
    Closed,

    #[error("MCP server error {code}: {message}")]
    Rpc { code: i64, message: String },
}

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<Value, McpError>>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Something that can open an initialized MCP session
#[async_trait]
pub trait McpConnect: Send + Sync {
    async fn connect(&self) -> Result<McpSession, McpError>;
}

/// Launches an MCP server as a child process
#[derive(Clone)]
pub struct McpLauncher {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl McpLauncher {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            env: Vec::new(),
            timeout,
        }
    }

    /// Launcher for `firecrawl-mcp`, passing the API key through the environment
    pub fn firecrawl(config: &FirecrawlConfig, api_key: &ApiKey) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
        .env("FIRECRAWL_API_KEY", api_key.expose())
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn spawn(&self) -> Result<McpSession, McpError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(McpError::Closed)?;
        let stdout = child.stdout.take().ok_or(McpError::Closed)?;
        if let Some(stderr) = child.stderr.take() {
            let command = self.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %command, "{}", line);
                }
            });
        }

        let mut session = McpSession::from_transport(stdout, stdin, self.timeout);
        session.child = Some(child);
        Ok(session)
    }
}

#[async_trait]
impl McpConnect for McpLauncher {
    #[instrument(name = "mcp.connect", skip(self), fields(command = %self.command))]
    async fn connect(&self) -> Result<McpSession, McpError> {
        let session = self.spawn()?;
        session.initialize().await?;
        Ok(session)
    }
}

/// A live JSON-RPC session with one MCP server
pub struct McpSession {
    writer: SharedWriter,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
    reader: JoinHandle<()>,
    child: Option<Child>,
}

impl McpSession {
    /// Build a session over an arbitrary byte stream pair.
    ///
    /// The session is not initialized; call [`McpSession::initialize`] first.
    pub fn from_transport<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending = PendingMap::default();
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Box::new(writer)));
        let reader = tokio::spawn(read_loop(
            BufReader::new(reader),
            pending.clone(),
            writer.clone(),
        ));

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
            reader,
            child: None,
        }
    }

    /// Perform the `initialize` handshake
    pub async fn initialize(&self) -> Result<(), McpError> {
        let result = self
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": MCP_CLIENT_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;

        tracing::debug!(
            server = %result.pointer("/serverInfo/name").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            protocol = %result.get("protocolVersion").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "MCP session initialized"
        );

        self.notify("notifications/initialized").await
    }

    /// List every tool the server offers, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let page: ListToolsResult = serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Invoke a tool by name
    #[instrument(name = "mcp.call_tool", skip(self, arguments))]
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, McpError> {
        let result = self
            .request(
                "tools/call",
                serde_json::json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        let result: CallToolResult = serde_json::from_value(result)?;
        Ok(result.into())
    }

    /// Close stdin and stop the server process
    pub async fn shutdown(mut self) {
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill().await;
        }
        self.reader.abort();
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);

        if let Err(e) = self.write_line(&line).await {
            lock_pending(&self.pending).remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                lock_pending(&self.pending).remove(&id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let line = serde_json::to_string(&JsonRpcNotification::new(method))?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), McpError> {
        write_line(&self.writer, line).await
    }
}

async fn write_line(writer: &SharedWriter, line: &str) -> Result<(), McpError> {
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

impl Drop for McpSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R: AsyncBufRead + Unpin>(reader: R, pending: PendingMap, writer: SharedWriter) {
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let Some(reply) = dispatch(&line, &pending) else {
                    continue;
                };
                let sent = match serde_json::to_string(&reply) {
                    Ok(reply) => write_line(&writer, &reply).await,
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = sent {
                    tracing::warn!(error = %e, "Failed to answer MCP server request");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "MCP read failed");
                break;
            }
        }
    }
    // Dropping the senders wakes every waiter with `Closed`
    lock_pending(&pending).clear();
}

/// Route one incoming line. Returns the reply owed to a server request, if any.
fn dispatch(line: &str, pending: &PendingMap) -> Option<JsonRpcResponse> {
    let message: IncomingMessage = match serde_json::from_str(line) {
        Ok(m) => m,
        Err(_) => {
            tracing::debug!(line = %line, "Ignoring non-JSON-RPC output from MCP server");
            return None;
        }
    };

    match message.response_id() {
        Some(id) => {
            let Some(waiter) = lock_pending(pending).remove(&id) else {
                tracing::debug!(id, "Response for unknown or expired MCP request");
                return None;
            };
            let result = match message.error {
                Some(err) => Err(McpError::Rpc {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(message.result.unwrap_or(Value::Null)),
            };
            let _ = waiter.send(result);
            None
        }
        None => match (message.id, message.method.as_deref()) {
            (Some(id), Some("ping")) => Some(JsonRpcResponse::result(id, serde_json::json!({}))),
            (Some(id), Some(method)) => {
                tracing::debug!(method, "Unsupported MCP server request");
                Some(JsonRpcResponse::method_not_found(id, method))
            }
            (_, method) => {
                tracing::debug!(method = ?method, "MCP server notification ignored");
                None
            }
        },
    }
}

/// Tool availability report for `/agents/mcp/tools`
#[derive(Debug, Clone, Serialize)]
pub struct ToolAvailability {
    pub status: &'static str,
    pub tools_count: usize,
    pub tool_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Open a session and report which tools the server exposes
pub async fn check_tools_availability(connector: &dyn McpConnect) -> ToolAvailability {
    let result = async {
        let session = connector.connect().await?;
        let tools = session.list_tools().await;
        session.shutdown().await;
        tools
    }
    .await;

    match result {
        Ok(tools) => ToolAvailability {
            status: "available",
            tools_count: tools.len(),
            tool_names: tools.into_iter().map(|t| t.name).collect(),
            error: None,
        },
        Err(e) => ToolAvailability {
            status: "error",
            tools_count: 0,
            tool_names: Vec::new(),
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMcp, FakeReply};

    fn search_server() -> FakeMcp {
        FakeMcp::new(|method, params| match method {
            "tools/list" => FakeReply::Result(serde_json::json!({
                "tools": [
                    {"name": "firecrawl_scrape", "description": "Scrape a page", "inputSchema": {"type": "object"}},
                    {"name": "firecrawl_search", "inputSchema": {"type": "object"}}
                ]
            })),
            "tools/call" => {
                let name = params["name"].as_str().unwrap_or_default();
                FakeReply::Result(serde_json::json!({
                    "content": [{"type": "text", "text": format!("called {}", name)}],
                    "isError": false
                }))
            }
            "slow" => FakeReply::Silent,
            "broken" => FakeReply::Error(-32601, "Method not found".to_string()),
            _ => FakeReply::Result(Value::Null),
        })
    }

    #[tokio::test]
    async fn test_list_and_call_tools() {
        let session = search_server().connect().await.unwrap();

        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["firecrawl_scrape", "firecrawl_search"]);

        let output = session
            .call_tool("firecrawl_search", serde_json::json!({"query": "rust"}))
            .await
            .unwrap();
        assert_eq!(output.text, "called firecrawl_search");
        assert!(!output.is_error);
    }

    #[tokio::test]
    async fn test_rpc_error_is_reported() {
        let session = search_server().connect().await.unwrap();
        let err = session.request("broken", Value::Null).await.unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn test_request_times_out_when_server_is_silent() {
        let session = search_server()
            .with_timeout(Duration::from_millis(50))
            .connect()
            .await
            .unwrap();
        let err = session.request("slow", Value::Null).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { ref method, .. } if method == "slow"));
        assert!(lock_pending(&session.pending).is_empty());
    }

    #[tokio::test]
    async fn test_closed_transport_fails_pending_requests() {
        let (client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(client);
        let session = McpSession::from_transport(read, write, Duration::from_secs(5));
        drop(server);

        let err = session.request("initialize", Value::Null).await.unwrap_err();
        assert!(matches!(err, McpError::Closed | McpError::Io(_)));
    }

    #[tokio::test]
    async fn test_list_tools_follows_cursor() {
        let server = FakeMcp::new(|method, params| match (method, params["cursor"].as_str()) {
            ("tools/list", None) => FakeReply::Result(serde_json::json!({
                "tools": [{"name": "firecrawl_scrape"}],
                "nextCursor": "page-2"
            })),
            ("tools/list", Some("page-2")) => FakeReply::Result(serde_json::json!({
                "tools": [{"name": "firecrawl_search"}, {"name": "firecrawl_map"}],
                "nextCursor": ""
            })),
            _ => FakeReply::Error(-32602, "Invalid cursor".to_string()),
        });
        let session = server.connect().await.unwrap();

        let tools = session.list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["firecrawl_scrape", "firecrawl_search", "firecrawl_map"]);
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let (client, server) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(client);
        let _session = McpSession::from_transport(read, write, Duration::from_secs(5));
        let (server_read, mut server_write) = tokio::io::split(server);
        let mut lines = BufReader::new(server_read).lines();

        server_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"srv-1\",\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply, serde_json::json!({"jsonrpc": "2.0", "id": "srv-1", "result": {}}));

        server_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"roots/list\"}\n")
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_check_tools_availability_reports_names() {
        let report = check_tools_availability(&search_server()).await;
        assert_eq!(report.status, "available");
        assert_eq!(report.tools_count, 2);
        assert!(report.error.is_none());
    }

    #[tokio::test]
    async fn test_check_tools_availability_reports_spawn_failure() {
        let launcher = McpLauncher::new(
            "definitely-not-an-mcp-server-binary",
            Vec::new(),
            Duration::from_secs(1),
        );
        let report = check_tools_availability(&launcher).await;
        assert_eq!(report.status, "error");
        assert_eq!(report.tools_count, 0);
        assert!(report.error.unwrap().contains("definitely-not-an-mcp-server-binary"));
    }
}
