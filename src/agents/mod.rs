//! Specialised chat agents and the registry that owns them.
//!
//! Every agent implements [`Agent`]. The HTTP layer only sees the trait and
//! dispatches on [`AgentKind`], the wire value of `agent_type`. Agents that
//! also accept new knowledge expose it through [`KnowledgeBase`].

pub mod conversation;
pub mod externo;
pub mod mcp;
pub mod mermaid;
pub mod rag;
pub mod registry;
pub mod workflow;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::LlmError;
use crate::mcp::McpError;
use crate::pinecone::PineconeError;

pub use registry::AgentRegistry;

/// The agents this service knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Mcp,
    Workflow,
    Rag,
    Externo,
    Mermaid,
}

/// Static, user-facing description of an agent kind
#[derive(Debug, Clone, Copy)]
pub struct AgentDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub features: &'static [&'static str],
}

impl AgentKind {
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Mcp,
        AgentKind::Workflow,
        AgentKind::Rag,
        AgentKind::Externo,
        AgentKind::Mermaid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Mcp => "mcp",
            AgentKind::Workflow => "workflow",
            AgentKind::Rag => "rag",
            AgentKind::Externo => "externo",
            AgentKind::Mermaid => "mermaid",
        }
    }

    pub fn descriptor(&self) -> AgentDescriptor {
        match self {
            AgentKind::Mcp => AgentDescriptor {
                name: "Firecrawl MCP Agent",
                description: "Live web scraping through the Model Context Protocol",
                features: &["Real-time scraping", "MCP tool integration", "Conversational analysis"],
            },
            AgentKind::Workflow => AgentDescriptor {
                name: "Workflow Agent",
                description: "Structured research and comparative analysis",
                features: &["Structured workflow", "Comparative analysis", "Recommendations"],
            },
            AgentKind::Rag => AgentDescriptor {
                name: "RAG Agent",
                description: "Retrieval-augmented generation backed by Pinecone",
                features: &["Semantic search", "Knowledge base", "Source citations"],
            },
            AgentKind::Externo => AgentDescriptor {
                name: "External Agent",
                description: "Bridge to an external Flowise prediction API",
                features: &["External APIs", "Conversational context"],
            },
            AgentKind::Mermaid => AgentDescriptor {
                name: "Mermaid Diagram Agent",
                description: "Generates Mermaid diagrams from descriptions",
                features: &["Sequence diagrams", "Flowcharts", "Gantt charts"],
            },
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unknown agent type: {0}")]
pub struct UnknownAgent(pub String);

impl FromStr for AgentKind {
    type Err = UnknownAgent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownAgent(s.to_string()))
    }
}

/// Error type for agent operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    VectorStore(#[from] PineconeError),

    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    #[error("No final answer after {0} tool rounds")]
    TooManyRounds(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not available: {0}")]
    NotReady(String),
}

impl AgentError {
    /// Whether the failure was an upstream deadline rather than a hard error
    pub fn is_timeout(&self) -> bool {
        match self {
            AgentError::Llm(e) => e.is_timeout(),
            AgentError::Mcp(McpError::Timeout { .. }) => true,
            AgentError::Http(e) => e.is_timeout(),
            AgentError::VectorStore(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// A chat message routed to one agent
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub message: String,
    /// Only meaningful for the mermaid agent
    pub diagram_type: Option<String>,
}

impl AgentRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagram_type: None,
        }
    }
}

/// A retrieved document backing an answer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub content: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub text: String,
    pub sources: Vec<Source>,
    pub confidence: Option<f32>,
}

impl AgentReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
            confidence: None,
        }
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// One-time asynchronous setup, run by the registry before the agent is exposed
    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    async fn process(&self, request: &AgentRequest) -> Result<AgentReply, AgentError>;

    /// Forget conversational state
    async fn reset(&self) {}

    /// Release resources at shutdown
    async fn cleanup(&self) {}

    fn knowledge_base(&self) -> Option<&dyn KnowledgeBase> {
        None
    }
}

/// Agents whose answers draw on an updatable document store
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Scrape `url` and index its content. Returns the number of chunks stored.
    async fn add_from_url(&self, url: &str) -> Result<usize, AgentError>;

    /// Index `text` under `source_id`. Returns the number of chunks stored.
    async fn add_from_text(&self, text: &str, source_id: &str) -> Result<usize, AgentError>;
}

/// Prefix of `s` holding at most `max` characters
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
