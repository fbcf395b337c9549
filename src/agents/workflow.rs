//! Structured research agent: query extraction, web search, then analysis.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use super::{truncate_chars, Agent, AgentError, AgentKind, AgentReply, AgentRequest};
use crate::config::{TOOL_OUTPUT_LIMIT, WORKFLOW_SEARCH_LIMIT};
use crate::llm::OpenAiClient;
use crate::mcp::McpConnect;

const SEARCH_TOOL: &str = "firecrawl_search";

/// Longest fallback query taken verbatim from the user message
const FALLBACK_QUERY_CHARS: usize = 200;

const QUERY_PROMPT: &str = "You turn a user's research request into a single web search query. \
Reply with JSON only, in the form {\"query\": \"...\"}.";

const ANALYSIS_PROMPT: &str = "You are a research analyst. Using only the search results provided, \
write a structured answer with these sections:
## Overview
## Comparison
## Recommendations
Cite the URLs you rely on. If the results are insufficient, say so.";

pub struct WorkflowAgent {
    llm: OpenAiClient,
    tools: Arc<dyn McpConnect>,
}

impl WorkflowAgent {
    pub fn new(llm: OpenAiClient, tools: Arc<dyn McpConnect>) -> Self {
        Self { llm, tools }
    }

    async fn extract_query(&self, message: &str) -> Result<String, AgentError> {
        let reply = self
            .llm
            .complete(QUERY_PROMPT, message, self.llm.default_options())
            .await?;
        Ok(parse_query(&reply).unwrap_or_else(|| fallback_query(message)))
    }

    async fn search(&self, query: &str) -> Result<String, AgentError> {
        let session = self.tools.connect().await?;
        let result = session
            .call_tool(
                SEARCH_TOOL,
                serde_json::json!({ "query": query, "limit": WORKFLOW_SEARCH_LIMIT }),
            )
            .await;
        session.shutdown().await;

        let output = result?;
        if output.is_error {
            return Err(AgentError::Tool {
                tool: SEARCH_TOOL.to_string(),
                message: output.text,
            });
        }
        Ok(output.text)
    }
}

#[async_trait]
impl Agent for WorkflowAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Workflow
    }

    #[instrument(name = "agent.workflow.process", skip_all)]
    async fn process(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let query = self.extract_query(&request.message).await?;
        tracing::debug!(query = %query, "Workflow search query");

        let results = self.search(&query).await?;
        let prompt = format!(
            "Request: {}\n\nSearch query: {}\n\nSearch results:\n{}",
            request.message,
            query,
            truncate_chars(&results, TOOL_OUTPUT_LIMIT)
        );
        let analysis = self
            .llm
            .complete(ANALYSIS_PROMPT, &prompt, self.llm.default_options())
            .await?;
        Ok(AgentReply::text(analysis))
    }
}

/// Pull `{"query": ...}` out of a model reply, tolerating code fences and prose
fn parse_query(reply: &str) -> Option<String> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&reply[start..=end]).ok()?;
    let query = value.get("query")?.as_str()?.trim();
    (!query.is_empty()).then(|| query.to_string())
}

fn fallback_query(message: &str) -> String {
    truncate_chars(message.trim(), FALLBACK_QUERY_CHARS).to_string()
}
