//! Mermaid diagram generation.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::instrument;

use super::{Agent, AgentError, AgentKind, AgentReply, AgentRequest};
use crate::config::DEFAULT_DIAGRAM_TYPE;
use crate::llm::OpenAiClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramType {
    Sequence,
    Flowchart,
    Class,
    State,
    Er,
    Gantt,
    Pie,
    Journey,
    Mindmap,
}

impl DiagramType {
    pub const ALL: [DiagramType; 9] = [
        DiagramType::Sequence,
        DiagramType::Flowchart,
        DiagramType::Class,
        DiagramType::State,
        DiagramType::Er,
        DiagramType::Gantt,
        DiagramType::Pie,
        DiagramType::Journey,
        DiagramType::Mindmap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramType::Sequence => "sequence",
            DiagramType::Flowchart => "flowchart",
            DiagramType::Class => "class",
            DiagramType::State => "state",
            DiagramType::Er => "er",
            DiagramType::Gantt => "gantt",
            DiagramType::Pie => "pie",
            DiagramType::Journey => "journey",
            DiagramType::Mindmap => "mindmap",
        }
    }

    /// Header keyword a valid diagram of this type starts with
    pub fn keyword(&self) -> &'static str {
        match self {
            DiagramType::Sequence => "sequenceDiagram",
            DiagramType::Flowchart => "flowchart",
            DiagramType::Class => "classDiagram",
            DiagramType::State => "stateDiagram",
            DiagramType::Er => "erDiagram",
            DiagramType::Gantt => "gantt",
            DiagramType::Pie => "pie",
            DiagramType::Journey => "journey",
            DiagramType::Mindmap => "mindmap",
        }
    }

    fn accepts(&self, code: &str) -> bool {
        let code = code.trim_start();
        code.starts_with(self.keyword())
            || (*self == DiagramType::Flowchart && code.starts_with("graph"))
    }
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiagramType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        DiagramType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| {
                let supported: Vec<_> = DiagramType::ALL.iter().map(|t| t.as_str()).collect();
                AgentError::InvalidInput(format!(
                    "unsupported diagram type '{}' (supported: {})",
                    s,
                    supported.join(", ")
                ))
            })
    }
}

pub struct MermaidAgent {
    llm: OpenAiClient,
}

impl MermaidAgent {
    pub fn new(llm: OpenAiClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for MermaidAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Mermaid
    }

    #[instrument(name = "agent.mermaid.process", skip_all, fields(diagram_type))]
    async fn process(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let diagram_type: DiagramType = request
            .diagram_type
            .as_deref()
            .unwrap_or(DEFAULT_DIAGRAM_TYPE)
            .parse()?;
        tracing::Span::current().record("diagram_type", diagram_type.as_str());

        let reply = self
            .llm
            .complete(&system_prompt(diagram_type), &request.message, self.llm.default_options())
            .await?;

        let code = extract_mermaid(&reply);
        if !diagram_type.accepts(&code) {
            tracing::warn!(expected = diagram_type.keyword(), "Generated diagram has an unexpected header");
        }
        Ok(AgentReply::text(format!("```mermaid\n{}\n```", code)))
    }
}

fn system_prompt(diagram_type: DiagramType) -> String {
    format!(
        "You create Mermaid diagrams. Produce a single {} diagram that starts with `{}` \
and models the user's description. Reply with the diagram inside one ```mermaid code block and nothing else. \
Use short, quoted labels and valid Mermaid syntax.",
        diagram_type,
        diagram_type.keyword()
    )
}

/// Diagram source from a model reply: the mermaid fenced block, else the first
/// fenced block, else the whole reply. The fence's info string is dropped.
fn extract_mermaid(reply: &str) -> String {
    // ASCII lowercasing keeps byte offsets valid for `reply`
    let lower = reply.to_ascii_lowercase();
    let fence = lower.find("```mermaid").or_else(|| lower.find("```"));

    if let Some(open) = fence {
        let after = &reply[open + 3..];
        let body = match after.find('\n') {
            Some(newline) => &after[newline + 1..],
            None => after,
        };
        let end = body.find("```").unwrap_or(body.len());
        return body[..end].trim().to_string();
    }
    reply.trim().to_string()
}
