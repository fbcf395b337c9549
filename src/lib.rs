//! agent-hub: an HTTP gateway to specialised AI agents.
//!
//! Chat messages arrive over HTTP and are routed to one of several agents: a
//! tool-using web research agent driving the Firecrawl MCP server, a structured
//! research workflow, a Pinecone-backed retrieval agent, a bridge to an external
//! Flowise flow, and a Mermaid diagram generator.

pub mod agents;
pub mod config;
pub mod error;
pub mod http;
pub mod llm;
pub mod mcp;
pub mod middleware;
pub mod pinecone;
pub mod rate_limit;
pub mod routes;
pub mod state;
pub mod templates;

#[cfg(test)]
mod testing;

pub use error::AppError;
pub use routes::create_router;
pub use state::AppState;
