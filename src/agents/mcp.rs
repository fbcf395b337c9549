//! Tool-using research agent backed by the Firecrawl MCP server.
//!
//! Each message opens a fresh MCP session, offers the server's tools to the
//! model as function tools and alternates model calls with tool execution
//! until the model answers in plain text. Conversation history survives
//! across messages.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::instrument;

use super::conversation::Conversation;
use super::{truncate_chars, Agent, AgentError, AgentKind, AgentReply, AgentRequest};
use crate::config::{AGENT_INPUT_MAX_CHARS, MAX_HISTORY_MESSAGES, MAX_TOOL_ROUNDS, TOOL_OUTPUT_LIMIT};
use crate::llm::{ChatMessage, ChatOptions, OpenAiClient, ToolCall, ToolDefinition};
use crate::mcp::{McpConnect, McpSession, McpTool};

const SYSTEM_PROMPT: &str = "You are an assistant specialised in researching and analysing products, tools, solutions and services.

You can:
- Scrape websites to extract information
- Search for and compare products and services
- Analyse prices, features and offers
- Give objective technical recommendations

Use the available Firecrawl tools to:
- Scrape specific pages
- Search the web for relevant information
- Extract structured data from websites

Always give useful, concise and well-structured answers.";

pub struct McpAgent {
    llm: OpenAiClient,
    tools: Arc<dyn McpConnect>,
    conversation: Mutex<Conversation>,
}

impl McpAgent {
    pub fn new(llm: OpenAiClient, tools: Arc<dyn McpConnect>) -> Self {
        Self {
            llm,
            tools,
            conversation: Mutex::new(Conversation::new(SYSTEM_PROMPT, MAX_HISTORY_MESSAGES)),
        }
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.conversation.lock().await.messages()
    }

    fn options(&self) -> ChatOptions {
        ChatOptions {
            temperature: 0.0,
            ..self.llm.default_options()
        }
    }
}

#[async_trait]
impl Agent for McpAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Mcp
    }

    #[instrument(name = "agent.mcp.process", skip_all)]
    async fn process(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let message = truncate_chars(&request.message, AGENT_INPUT_MAX_CHARS);
        let transcript = self.conversation.lock().await.transcript_with(message);

        let session = self.tools.connect().await?;
        let result = run_tool_loop(&self.llm, &session, transcript, self.options()).await;
        session.shutdown().await;
        let answer = result?;

        self.conversation.lock().await.record(message, &answer);
        Ok(AgentReply::text(answer))
    }

    async fn reset(&self) {
        self.conversation.lock().await.reset();
    }
}

/// Describe MCP tools as OpenAI function tools
pub(crate) fn tool_definitions(tools: &[McpTool]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|tool| {
            ToolDefinition::function(
                tool.name.clone(),
                tool.description.clone(),
                tool.input_schema.clone(),
            )
        })
        .collect()
}

/// Drive the model until it answers without requesting tools
pub(crate) async fn run_tool_loop(
    llm: &OpenAiClient,
    session: &McpSession,
    mut transcript: Vec<ChatMessage>,
    options: ChatOptions,
) -> Result<String, AgentError> {
    let tools = session.list_tools().await?;
    let known: HashSet<String> = tools.iter().map(|t| t.name.clone()).collect();
    let definitions = tool_definitions(&tools);

    for round in 0..MAX_TOOL_ROUNDS {
        let reply = llm.chat(&transcript, &definitions, options).await?;
        if reply.tool_calls.is_empty() {
            return Ok(reply.text().to_string());
        }

        tracing::debug!(round, calls = reply.tool_calls.len(), "Model requested tools");
        let calls = reply.tool_calls.clone();
        transcript.push(reply);
        for call in calls {
            let output = execute_tool_call(session, &known, &call).await;
            transcript.push(ChatMessage::tool(call.id, output));
        }
    }

    Err(AgentError::TooManyRounds(MAX_TOOL_ROUNDS))
}

/// Run one tool call. Failures become text for the model rather than errors.
async fn execute_tool_call(session: &McpSession, known: &HashSet<String>, call: &ToolCall) -> String {
    let name = call.function.name.as_str();
    if !known.contains(name) {
        return format!("Error: unknown tool '{}'", name);
    }

    let arguments = match parse_arguments(&call.function.arguments) {
        Ok(args) => args,
        Err(e) => return format!("Error: invalid arguments for '{}': {}", name, e),
    };

    match session.call_tool(name, arguments).await {
        Ok(output) if output.is_error => {
            tracing::warn!(tool = %name, "Tool reported an error");
            format!("Error: {}", truncate_chars(&output.text, TOOL_OUTPUT_LIMIT))
        }
        Ok(output) => truncate_chars(&output.text, TOOL_OUTPUT_LIMIT).to_string(),
        Err(e) => {
            tracing::warn!(tool = %name, error = %e, "Tool call failed");
            format!("Error: {}", e)
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}
