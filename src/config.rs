//! Configuration loading and constants.
//!
//! Loads application configuration from a TOML file (falling back to built-in
//! defaults when the file is absent), then overlays environment variables so a
//! `.env` file can supply API keys. `AppConfig` is the root configuration struct.

use const_format::formatcp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

// =============================================================================
// HTTP Response Cache Control
// =============================================================================

/// Static assets (CSS, JS) - long cache with immutable hint
pub const HTTP_CACHE_STATIC_MAX_AGE: u32 = 86400;

pub const CACHE_CONTROL_STATIC: &str =
    formatcp!("public, max-age={}, immutable", HTTP_CACHE_STATIC_MAX_AGE);

/// Health and API responses must never be served from a cache
pub const CACHE_CONTROL_NO_STORE: &str = "no-store";

// =============================================================================
// Chat Limits
// =============================================================================

/// Maximum length of a chat message (characters)
pub const CHAT_MESSAGE_MAX_CHARS: usize = 5000;

/// Diagram type used when a mermaid request does not name one
pub const DEFAULT_DIAGRAM_TYPE: &str = "sequence";

/// RAG source excerpts returned to the client are cut at this many characters
pub const SOURCE_PREVIEW_CHARS: usize = 200;

// =============================================================================
// Agent Limits
// =============================================================================

/// User input forwarded to the tool-using agent is truncated to this many characters
pub const AGENT_INPUT_MAX_CHARS: usize = 175_000;

/// Maximum model/tool round trips before the tool-using agent gives up
pub const MAX_TOOL_ROUNDS: usize = 10;

/// Tool output handed back to the model is truncated to this many characters
pub const TOOL_OUTPUT_LIMIT: usize = 50_000;

/// Conversation history kept besides the system prompt
pub const MAX_HISTORY_MESSAGES: usize = 40;

/// Number of results requested from the search tool by the workflow agent
pub const WORKFLOW_SEARCH_LIMIT: u64 = 5;

/// Knowledge chunk size and overlap (characters)
pub const RAG_CHUNK_SIZE: usize = 1000;
pub const RAG_CHUNK_OVERLAP: usize = 200;

// =============================================================================
// MCP Protocol
// =============================================================================

/// Protocol revision sent in the `initialize` handshake
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name reported to MCP servers
pub const MCP_CLIENT_NAME: &str = "agent-hub";

// =============================================================================
// Health Check
// =============================================================================

/// Timeout for the `healthcheck` subcommand, matching the container probe
pub const HEALTHCHECK_TIMEOUT_SECS: u64 = 10;

/// Seconds to wait for in-flight requests after a shutdown signal
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Glob pattern for template files
pub const TEMPLATE_GLOB: &str = "templates/**/*";

/// Directory for static files
pub const STATIC_DIR: &str = "static";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "agent_hub=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

/// Default deployment environment name
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// An API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub http: HttpServerConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub firecrawl: FirecrawlConfig,
    #[serde(default)]
    pub pinecone: PineconeConfig,
    #[serde(default)]
    pub externo: ExternoConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Deployment environment reported by `/health`
    #[serde(default = "AppConfig::default_environment")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpServerConfig::default(),
            openai: OpenAiConfig::default(),
            firecrawl: FirecrawlConfig::default(),
            pinecone: PineconeConfig::default(),
            externo: ExternoConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
            environment: Self::default_environment(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "HttpServerConfig::default_host")]
    pub host: String,
    #[serde(default = "HttpServerConfig::default_port")]
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

impl HttpServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8000
    }

    /// Parse host and port into a bindable address
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                ConfigError::Validation(format!(
                    "Invalid http.host or http.port '{}:{}': {}",
                    self.host, self.port, e
                ))
            })
    }
}

/// OpenAI-compatible chat and embedding API settings
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    /// Usually supplied through `OPENAI_API_KEY`
    pub api_key: Option<ApiKey>,
    #[serde(default = "OpenAiConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "OpenAiConfig::default_model")]
    pub model: String,
    #[serde(default = "OpenAiConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "OpenAiConfig::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "OpenAiConfig::default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "OpenAiConfig::default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: Self::default_base_url(),
            model: Self::default_model(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
            embedding_model: Self::default_embedding_model(),
            timeout_seconds: Self::default_timeout(),
        }
    }
}

impl OpenAiConfig {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }
    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }
    fn default_temperature() -> f32 {
        0.1
    }
    fn default_max_tokens() -> u32 {
        2000
    }
    fn default_embedding_model() -> String {
        "text-embedding-3-small".to_string()
    }
    fn default_timeout() -> u64 {
        60
    }
}

/// Firecrawl MCP server launch settings
#[derive(Debug, Clone, Deserialize)]
pub struct FirecrawlConfig {
    /// Usually supplied through `FIRECRAWL_API_KEY`
    pub api_key: Option<ApiKey>,
    /// Executable that starts the MCP server
    #[serde(default = "FirecrawlConfig::default_command")]
    pub command: String,
    #[serde(default = "FirecrawlConfig::default_args")]
    pub args: Vec<String>,
    /// Per-request timeout for MCP calls (seconds)
    #[serde(default = "FirecrawlConfig::default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for FirecrawlConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            command: Self::default_command(),
            args: Self::default_args(),
            timeout_seconds: Self::default_timeout(),
        }
    }
}

impl FirecrawlConfig {
    fn default_command() -> String {
        "npx".to_string()
    }
    fn default_args() -> Vec<String> {
        vec!["firecrawl-mcp".to_string()]
    }
    fn default_timeout() -> u64 {
        30
    }
}

/// Pinecone vector index settings
#[derive(Debug, Clone, Deserialize)]
pub struct PineconeConfig {
    /// Usually supplied through `PINECONE_API_KEY`
    pub api_key: Option<ApiKey>,
    /// Control-plane URL used to resolve the index host
    #[serde(default = "PineconeConfig::default_api_url")]
    pub api_url: String,
    #[serde(default = "PineconeConfig::default_index_name")]
    pub index_name: String,
    /// Number of matches retrieved per query
    #[serde(default = "PineconeConfig::default_top_k")]
    pub top_k: u32,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: Self::default_api_url(),
            index_name: Self::default_index_name(),
            top_k: Self::default_top_k(),
        }
    }
}

impl PineconeConfig {
    fn default_api_url() -> String {
        "https://api.pinecone.io".to_string()
    }
    fn default_index_name() -> String {
        "fia-agente-ia".to_string()
    }
    fn default_top_k() -> u32 {
        4
    }
}

/// External (Flowise) prediction endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ExternoConfig {
    /// Usually supplied through `API_EXTERNO_AGENT`
    pub url: Option<String>,
    #[serde(default = "ExternoConfig::default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ExternoConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_seconds: Self::default_timeout(),
        }
    }
}

impl ExternoConfig {
    fn default_timeout() -> u64 {
        60
    }
}

/// Per-client request limiting for the chat and knowledge endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "RateLimitConfig::default_enabled")]
    pub enabled: bool,
    /// Requests allowed per window
    #[serde(default = "RateLimitConfig::default_requests")]
    pub requests: usize,
    /// Window length in seconds
    #[serde(default = "RateLimitConfig::default_period")]
    pub period_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            requests: Self::default_requests(),
            period_seconds: Self::default_period(),
        }
    }
}

impl RateLimitConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_requests() -> usize {
        100
    }
    fn default_period() -> u64 {
        60
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    fn default_environment() -> String {
        DEFAULT_ENVIRONMENT.to_string()
    }

    /// Load configuration from a TOML file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Overlay environment variables on top of file settings.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.openai.api_key = Some(ApiKey::new(key));
        }
        if let Some(key) = non_empty("FIRECRAWL_API_KEY") {
            self.firecrawl.api_key = Some(ApiKey::new(key));
        }
        if let Some(key) = non_empty("PINECONE_API_KEY") {
            self.pinecone.api_key = Some(ApiKey::new(key));
        }
        if let Some(url) = non_empty("API_EXTERNO_AGENT") {
            self.externo.url = Some(url);
        }
        if let Some(host) = non_empty("HOST") {
            self.http.host = host;
        }
        if let Some(port) = non_empty("PORT") {
            self.http.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("Invalid PORT value '{}'", port)))?;
        }
        if let Some(environment) = non_empty("ENVIRONMENT") {
            self.environment = environment;
        }
        Ok(())
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Validation("http.port must be non-zero".to_string()));
        }
        if self.rate_limit.enabled
            && (self.rate_limit.requests == 0 || self.rate_limit.period_seconds == 0)
        {
            return Err(ConfigError::Validation(
                "rate_limit.requests and rate_limit.period_seconds must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.openai.temperature) {
            return Err(ConfigError::Validation(format!(
                "openai.temperature must be between 0 and 2, got {}",
                self.openai.temperature
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
