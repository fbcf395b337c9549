//! Retrieval-augmented answering over a Pinecone index.
//!
//! Knowledge is split into overlapping character chunks, embedded, and
//! upserted under deterministic ids. Re-adding a source overwrites its
//! chunks in place, then deletes any higher-numbered chunks left over from a
//! longer earlier version. Questions are embedded, matched against the index and
//! answered from the retrieved context only.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::instrument;

use super::{Agent, AgentError, AgentKind, AgentReply, AgentRequest, KnowledgeBase, Source};
use crate::config::{RAG_CHUNK_OVERLAP, RAG_CHUNK_SIZE};
use crate::llm::OpenAiClient;
use crate::mcp::McpConnect;
use crate::pinecone::{Match, PineconeClient, Vector};

const SCRAPE_TOOL: &str = "firecrawl_scrape";

/// Inputs per embeddings request
const EMBED_BATCH: usize = 64;

const ANSWER_PROMPT: &str = "You answer questions using only the numbered context passages provided. \
Cite passages by their number, e.g. [1]. If the context does not contain the answer, say that you do not know.";

const NO_MATCHES_ANSWER: &str =
    "I could not find relevant information in the knowledge base to answer this question.";

pub struct RagAgent {
    llm: OpenAiClient,
    index: PineconeClient,
    scraper: Option<Arc<dyn McpConnect>>,
    top_k: u32,
}

impl RagAgent {
    pub fn new(
        llm: OpenAiClient,
        index: PineconeClient,
        scraper: Option<Arc<dyn McpConnect>>,
        top_k: u32,
    ) -> Self {
        Self {
            llm,
            index,
            scraper,
            top_k,
        }
    }

    async fn embed_all(&self, chunks: &[String]) -> Result<Vec<Vec<f32>>, AgentError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH) {
            vectors.extend(self.llm.embed(batch).await?);
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Agent for RagAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Rag
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.index.resolve_host().await?;
        Ok(())
    }

    #[instrument(name = "agent.rag.process", skip_all, fields(index = %self.index.index_name()))]
    async fn process(&self, request: &AgentRequest) -> Result<AgentReply, AgentError> {
        let question = request.message.trim();
        let embedding = self
            .llm
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let matches = self.index.query(&embedding, self.top_k).await?;
        if matches.is_empty() {
            return Ok(AgentReply {
                text: NO_MATCHES_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: Some(0.0),
            });
        }

        let prompt = format!(
            "Context:\n{}\n\nQuestion: {}",
            build_context(&matches),
            question
        );
        let answer = self
            .llm
            .complete(ANSWER_PROMPT, &prompt, self.llm.default_options())
            .await?;

        Ok(AgentReply {
            text: answer,
            confidence: Some(mean_score(&matches)),
            sources: matches.into_iter().map(into_source).collect(),
        })
    }

    fn knowledge_base(&self) -> Option<&dyn KnowledgeBase> {
        Some(self)
    }
}

#[async_trait]
impl KnowledgeBase for RagAgent {
    #[instrument(name = "agent.rag.add_from_url", skip(self))]
    async fn add_from_url(&self, url: &str) -> Result<usize, AgentError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AgentError::InvalidInput(format!("not an http(s) URL: {}", url)));
        }
        let scraper = self.scraper.as_ref().ok_or_else(|| {
            AgentError::NotReady("URL ingestion requires FIRECRAWL_API_KEY".to_string())
        })?;

        let session = scraper.connect().await?;
        let result = session
            .call_tool(
                SCRAPE_TOOL,
                serde_json::json!({ "url": url, "formats": ["markdown"] }),
            )
            .await;
        session.shutdown().await;

        let output = result?;
        if output.is_error {
            return Err(AgentError::Tool {
                tool: SCRAPE_TOOL.to_string(),
                message: output.text,
            });
        }
        self.add_from_text(&output.text, url).await
    }

    #[instrument(name = "agent.rag.add_from_text", skip(self, text), fields(chars = text.len()))]
    async fn add_from_text(&self, text: &str, source_id: &str) -> Result<usize, AgentError> {
        let chunks = chunk_text(text, RAG_CHUNK_SIZE, RAG_CHUNK_OVERLAP);
        if chunks.is_empty() {
            return Err(AgentError::InvalidInput("no text content to index".to_string()));
        }

        let embeddings = self.embed_all(&chunks).await?;
        let vectors = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, values))| Vector {
                id: chunk_id(source_id, i),
                values,
                metadata: serde_json::json!({
                    "text": chunk,
                    "source_id": source_id,
                    "chunk": i,
                }),
            })
            .collect::<Vec<_>>();

        let count = vectors.len();
        let stored = self.index.upsert(vectors).await?;
        self.index
            .delete_matching(serde_json::json!({
                "source_id": { "$eq": source_id },
                "chunk": { "$gte": count },
            }))
            .await?;
        tracing::info!(source_id = %source_id, chunks = count, stored, "Knowledge indexed");
        Ok(count)
    }
}

/// Split `text` into chunks of at most `size` characters, consecutive chunks
/// sharing `overlap` characters. Whitespace-only chunks are dropped.
pub(crate) fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Stable vector id for chunk `index` of `source_id`
pub(crate) fn chunk_id(source_id: &str, index: usize) -> String {
    format!("{:x}", Sha256::digest(format!("{}:{}", source_id, index).as_bytes()))
}

fn match_text(m: &Match) -> &str {
    m.metadata
        .get("text")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
}

fn build_context(matches: &[Match]) -> String {
    matches
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let source = m
                .metadata
                .get("source_id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or(m.id.as_str());
            format!("[{}] (source: {})\n{}", i + 1, source, match_text(m))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn mean_score(matches: &[Match]) -> f32 {
    if matches.is_empty() {
        return 0.0;
    }
    matches.iter().map(|m| m.score).sum::<f32>() / matches.len() as f32
}

fn into_source(m: Match) -> Source {
    let content = match_text(&m).to_string();
    let mut metadata = m.metadata;
    if let Some(map) = metadata.as_object_mut() {
        map.remove("text");
    }
    Source {
        content,
        score: m.score,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKey, PineconeConfig};
    use crate::testing::{text_reply, FakeMcp, FakeOpenAi, FakeReply};
    use axum::{extract::State, routing::post, Json, Router};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct FakeIndex {
        upserts: Arc<Mutex<Vec<serde_json::Value>>>,
        deletes: Arc<Mutex<Vec<serde_json::Value>>>,
        matches: Arc<Mutex<serde_json::Value>>,
    }

    async fn upsert(State(index): State<FakeIndex>, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
        let count = body["vectors"].as_array().map(|v| v.len()).unwrap_or(0);
        index.upserts.lock().unwrap().push(body);
        Json(serde_json::json!({ "upsertedCount": count }))
    }

    async fn delete(State(index): State<FakeIndex>, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
        index.deletes.lock().unwrap().push(body);
        Json(serde_json::json!({}))
    }

    async fn query(State(index): State<FakeIndex>) -> Json<serde_json::Value> {
        Json(serde_json::json!({ "matches": index.matches.lock().unwrap().clone() }))
    }

    async fn start_index(matches: serde_json::Value) -> (FakeIndex, String) {
        let index = FakeIndex {
            matches: Arc::new(Mutex::new(matches)),
            ..Default::default()
        };
        let app = Router::new()
            .route("/vectors/upsert", post(upsert))
            .route("/vectors/delete", post(delete))
            .route("/query", post(query))
            .with_state(index.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (index, format!("http://{}", addr))
    }

    fn pinecone(host: &str) -> PineconeClient {
        PineconeClient::new(&PineconeConfig::default(), ApiKey::new("pc-test"))
            .unwrap()
            .with_host(host)
    }

    // =============================================================================
    // Chunking
    // =============================================================================

    #[test]
    fn test_chunk_text_overlaps() {
        let text: String = ('a'..='j').collect();
        let chunks = chunk_text(&text, 4, 2);
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "ghij"]);
    }

    #[test]
    fn test_chunk_text_short_input_is_single_chunk() {
        assert_eq!(chunk_text("  hello  ", 1000, 200), vec!["hello"]);
        assert!(chunk_text("   ", 1000, 200).is_empty());
        assert!(chunk_text("", 1000, 200).is_empty());
    }

    #[test]
    fn test_chunk_text_counts_characters_not_bytes() {
        let text = "é".repeat(10);
        let chunks = chunk_text(&text, 5, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 5);
    }

    #[test]
    fn test_chunk_id_is_stable_and_distinct() {
        assert_eq!(chunk_id("doc", 0), chunk_id("doc", 0));
        assert_ne!(chunk_id("doc", 0), chunk_id("doc", 1));
        assert_eq!(chunk_id("doc", 0).len(), 64);
    }

    #[test]
    fn test_mean_score() {
        let matches: Vec<Match> = serde_json::from_value(serde_json::json!([
            {"id": "a", "score": 0.9},
            {"id": "b", "score": 0.5}
        ]))
        .unwrap();
        assert!((mean_score(&matches) - 0.7).abs() < 1e-6);
        assert_eq!(mean_score(&[]), 0.0);
    }

    // =============================================================================
    // Agent behaviour
    // =============================================================================

    #[tokio::test]
    async fn test_add_from_text_upserts_chunks() {
        let llm = FakeOpenAi::start(vec![]).await;
        let (index, host) = start_index(serde_json::json!([])).await;
        let agent = RagAgent::new(llm.client(), pinecone(&host), None, 4);

        let text = "x".repeat(RAG_CHUNK_SIZE + 500);
        let count = agent.add_from_text(&text, "manual").await.unwrap();
        assert_eq!(count, 2);

        let upserts = index.upserts.lock().unwrap().clone();
        let vectors = upserts[0]["vectors"].as_array().unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0]["id"], chunk_id("manual", 0));
        assert_eq!(vectors[1]["metadata"]["chunk"], 1);
        assert_eq!(vectors[0]["metadata"]["source_id"], "manual");
    }

    #[tokio::test]
    async fn test_re_adding_shorter_source_deletes_stale_chunks() {
        let llm = FakeOpenAi::start(vec![]).await;
        let (index, host) = start_index(serde_json::json!([])).await;
        let agent = RagAgent::new(llm.client(), pinecone(&host), None, 4);

        agent.add_from_text(&"x".repeat(RAG_CHUNK_SIZE * 3), "notes").await.unwrap();
        let count = agent.add_from_text("short now", "notes").await.unwrap();
        assert_eq!(count, 1);

        let deletes = index.deletes.lock().unwrap().clone();
        assert_eq!(deletes.len(), 2);
        assert_eq!(
            deletes[1]["filter"],
            serde_json::json!({"source_id": {"$eq": "notes"}, "chunk": {"$gte": 1}})
        );
        let upserts = index.upserts.lock().unwrap().clone();
        assert_eq!(upserts[1]["vectors"][0]["id"], chunk_id("notes", 0));
    }

    #[tokio::test]
    async fn test_add_from_url_requires_scraper() {
        let llm = FakeOpenAi::start(vec![]).await;
        let (_, host) = start_index(serde_json::json!([])).await;
        let agent = RagAgent::new(llm.client(), pinecone(&host), None, 4);

        let err = agent.add_from_url("https://example.com").await.unwrap_err();
        assert!(matches!(err, AgentError::NotReady(_)));

        let err = agent.add_from_url("ftp://example.com").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_add_from_url_indexes_scraped_markdown() {
        let llm = FakeOpenAi::start(vec![]).await;
        let (index, host) = start_index(serde_json::json!([])).await;
        let scraper = FakeMcp::new(|method, params| {
            assert_eq!(method, "tools/call");
            assert_eq!(params["name"], SCRAPE_TOOL);
            FakeReply::Result(serde_json::json!({
                "content": [{"type": "text", "text": "# Example\nSome page content."}]
            }))
        });
        let agent = RagAgent::new(llm.client(), pinecone(&host), Some(Arc::new(scraper)), 4);

        let count = agent.add_from_url("https://example.com").await.unwrap();
        assert_eq!(count, 1);
        let upserts = index.upserts.lock().unwrap().clone();
        assert_eq!(upserts[0]["vectors"][0]["metadata"]["source_id"], "https://example.com");
    }

    #[tokio::test]
    async fn test_process_answers_with_sources_and_confidence() {
        let llm = FakeOpenAi::start(vec![text_reply("Rust is memory safe [1].")]).await;
        let (_, host) = start_index(serde_json::json!([
            {"id": "v1", "score": 0.8, "metadata": {"text": "Rust guarantees memory safety.", "source_id": "rust-book", "chunk": 0}},
            {"id": "v2", "score": 0.6, "metadata": {"text": "Ownership rules.", "source_id": "rust-book", "chunk": 1}}
        ]))
        .await;
        let agent = RagAgent::new(llm.client(), pinecone(&host), None, 4);

        let reply = agent.process(&AgentRequest::new("Is Rust memory safe?")).await.unwrap();
        assert_eq!(reply.text, "Rust is memory safe [1].");
        assert!((reply.confidence.unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(reply.sources.len(), 2);
        assert_eq!(reply.sources[0].content, "Rust guarantees memory safety.");
        assert!(reply.sources[0].metadata.get("text").is_none());
        assert_eq!(reply.sources[0].metadata["source_id"], "rust-book");

        let answer_request = llm
            .requests()
            .into_iter()
            .find(|r| r.get("messages").is_some())
            .unwrap();
        let prompt = answer_request["messages"][1]["content"].as_str().unwrap();
        assert!(prompt.contains("[1] (source: rust-book)"));
    }

    #[tokio::test]
    async fn test_process_without_matches_skips_llm() {
        let llm = FakeOpenAi::start(vec![]).await;
        let (_, host) = start_index(serde_json::json!([])).await;
        let agent = RagAgent::new(llm.client(), pinecone(&host), None, 4);

        let reply = agent.process(&AgentRequest::new("anything")).await.unwrap();
        assert_eq!(reply.text, NO_MATCHES_ANSWER);
        assert_eq!(reply.confidence, Some(0.0));
        assert!(reply.sources.is_empty());
    }
}
