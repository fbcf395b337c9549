//! Builds the configured agents and tracks which ones came up.
//!
//! An agent is only exposed once its prerequisites (API keys, URLs) are
//! present and its `initialize()` succeeded. Everything else is remembered
//! as an error string so `/agents/status` can explain why an agent is missing.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;
use serde::Serialize;

use super::externo::ExternoAgent;
use super::mcp::McpAgent;
use super::mermaid::MermaidAgent;
use super::rag::RagAgent;
use super::workflow::WorkflowAgent;
use super::{Agent, AgentKind};
use crate::config::AppConfig;
use crate::llm::OpenAiClient;
use crate::mcp::{McpConnect, McpLauncher};
use crate::pinecone::PineconeClient;

const MISSING_KEYS: &str = "Missing API keys";
const MISSING_PINECONE_KEY: &str = "Missing Pinecone API key";

/// One row of `/agents/info`
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    #[serde(rename = "type")]
    pub kind: AgentKind,
    pub name: &'static str,
    pub description: &'static str,
    pub features: &'static [&'static str],
    pub available: bool,
}

pub struct AgentRegistry {
    agents: RwLock<BTreeMap<AgentKind, Arc<dyn Agent>>>,
    errors: BTreeMap<AgentKind, String>,
    tool_server: Option<Arc<dyn McpConnect>>,
}

impl AgentRegistry {
    /// Build and initialize every agent whose prerequisites are configured
    pub async fn from_config(config: &AppConfig) -> Self {
        let mut errors = BTreeMap::new();
        let mut candidates: Vec<Arc<dyn Agent>> = Vec::new();

        let llm = match config.openai.api_key.clone() {
            Some(key) => match OpenAiClient::new(&config.openai, key) {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build OpenAI client");
                    None
                }
            },
            None => None,
        };

        let tool_server: Option<Arc<dyn McpConnect>> =
            config.firecrawl.api_key.as_ref().map(|key| {
                Arc::new(McpLauncher::firecrawl(&config.firecrawl, key)) as Arc<dyn McpConnect>
            });

        match (&llm, &tool_server) {
            (Some(llm), Some(tools)) => {
                candidates.push(Arc::new(McpAgent::new(llm.clone(), tools.clone())));
                candidates.push(Arc::new(WorkflowAgent::new(llm.clone(), tools.clone())));
            }
            _ => {
                errors.insert(AgentKind::Mcp, MISSING_KEYS.to_string());
                errors.insert(AgentKind::Workflow, MISSING_KEYS.to_string());
            }
        }

        match (&llm, config.pinecone.api_key.clone()) {
            (Some(llm), Some(key)) => match PineconeClient::new(&config.pinecone, key) {
                Ok(index) => candidates.push(Arc::new(RagAgent::new(
                    llm.clone(),
                    index,
                    tool_server.clone(),
                    config.pinecone.top_k,
                ))),
                Err(e) => {
                    errors.insert(AgentKind::Rag, e.to_string());
                }
            },
            (None, _) => {
                errors.insert(AgentKind::Rag, MISSING_KEYS.to_string());
            }
            (Some(_), None) => {
                errors.insert(AgentKind::Rag, MISSING_PINECONE_KEY.to_string());
            }
        }

        if let Some(url) = &config.externo.url {
            match ExternoAgent::new(url.clone(), &config.externo) {
                Ok(agent) => candidates.push(Arc::new(agent)),
                Err(e) => {
                    errors.insert(AgentKind::Externo, e.to_string());
                }
            }
        }

        if let Some(llm) = &llm {
            candidates.push(Arc::new(MermaidAgent::new(llm.clone())));
        }

        for (kind, error) in &errors {
            tracing::warn!(agent = %kind, error = %error, "Agent not started");
        }

        Self::initialize_all(candidates, errors, tool_server).await
    }

    /// Registry over already constructed agents, each still initialized
    pub async fn from_agents(agents: Vec<Arc<dyn Agent>>) -> Self {
        Self::initialize_all(agents, BTreeMap::new(), None).await
    }

    /// Attach the MCP server used by `/agents/mcp/tools`
    pub fn with_tool_server(mut self, tool_server: Arc<dyn McpConnect>) -> Self {
        self.tool_server = Some(tool_server);
        self
    }

    async fn initialize_all(
        candidates: Vec<Arc<dyn Agent>>,
        mut errors: BTreeMap<AgentKind, String>,
        tool_server: Option<Arc<dyn McpConnect>>,
    ) -> Self {
        let results = join_all(candidates.into_iter().map(|agent| async move {
            let result = agent.initialize().await;
            (agent, result)
        }))
        .await;

        let mut agents = BTreeMap::new();
        for (agent, result) in results {
            let kind = agent.kind();
            match result {
                Ok(()) => {
                    tracing::info!(agent = %kind, "Agent initialized");
                    agents.insert(kind, agent);
                }
                Err(e) => {
                    tracing::error!(agent = %kind, error = %e, "Agent failed to initialize");
                    errors.insert(kind, e.to_string());
                }
            }
        }

        Self {
            agents: RwLock::new(agents),
            errors,
            tool_server,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<AgentKind, Arc<dyn Agent>>> {
        self.agents.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<AgentKind, Arc<dyn Agent>>> {
        self.agents.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn Agent>> {
        self.read().get(&kind).cloned()
    }

    /// Kinds that are ready to serve, in declaration order
    pub fn available(&self) -> Vec<AgentKind> {
        self.read().keys().copied().collect()
    }

    pub fn status(&self) -> BTreeMap<AgentKind, String> {
        let agents = self.read();
        AgentKind::ALL
            .into_iter()
            .map(|kind| {
                let status = if agents.contains_key(&kind) {
                    "available".to_string()
                } else if let Some(error) = self.errors.get(&kind) {
                    format!("error: {}", error)
                } else {
                    "not configured".to_string()
                };
                (kind, status)
            })
            .collect()
    }

    pub fn info(&self) -> Vec<AgentInfo> {
        let agents = self.read();
        AgentKind::ALL
            .into_iter()
            .map(|kind| {
                let descriptor = kind.descriptor();
                AgentInfo {
                    kind,
                    name: descriptor.name,
                    description: descriptor.description,
                    features: descriptor.features,
                    available: agents.contains_key(&kind),
                }
            })
            .collect()
    }

    pub fn tool_server(&self) -> Option<Arc<dyn McpConnect>> {
        self.tool_server.clone()
    }

    /// Release every agent's resources and empty the registry
    pub async fn cleanup(&self) {
        let agents = std::mem::take(&mut *self.write());
        join_all(agents.values().map(|agent| agent.cleanup())).await;
        tracing::info!(count = agents.len(), "Agents cleaned up");
    }
}
