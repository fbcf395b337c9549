//! Minimal Pinecone REST client: index host discovery, upsert, delete and query.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::config::{ApiKey, PineconeConfig};

const API_VERSION_HEADER: &str = "X-Pinecone-API-Version";
const API_VERSION: &str = "2024-07";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Vectors per upsert request
const UPSERT_BATCH: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum PineconeError {
    #[error("Pinecone request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Pinecone returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl PineconeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PineconeError::Http(e) if e.is_timeout())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Vector {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Match {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Deserialize)]
struct DescribeIndex {
    host: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<Match>,
}

#[derive(Deserialize)]
struct UpsertResponse {
    #[serde(rename = "upsertedCount", default)]
    upserted_count: usize,
}

pub struct PineconeClient {
    http: reqwest::Client,
    api_url: String,
    api_key: ApiKey,
    index_name: String,
    host: OnceCell<String>,
}

impl PineconeClient {
    pub fn new(config: &PineconeConfig, api_key: ApiKey) -> Result<Self, PineconeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            index_name: config.index_name.clone(),
            host: OnceCell::new(),
        })
    }

    /// Skip discovery and talk to a known data-plane host
    pub fn with_host(self, host: impl Into<String>) -> Self {
        let host = normalize_host(&host.into());
        Self {
            host: OnceCell::new_with(Some(host)),
            ..self
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Resolve (once) the data-plane host of the configured index
    #[instrument(name = "pinecone.resolve_host", skip(self), fields(index = %self.index_name))]
    pub async fn resolve_host(&self) -> Result<&str, PineconeError> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let url = format!(
                    "{}/indexes/{}",
                    self.api_url,
                    urlencoding::encode(&self.index_name)
                );
                let response = self
                    .http
                    .get(url)
                    .header("Api-Key", self.api_key.expose())
                    .header(API_VERSION_HEADER, API_VERSION)
                    .send()
                    .await?;
                let index: DescribeIndex = check_status(response).await?.json().await?;
                tracing::info!(host = %index.host, "Resolved Pinecone index host");
                Ok::<_, PineconeError>(normalize_host(&index.host))
            })
            .await?;
        Ok(host.as_str())
    }

    /// Upsert vectors in batches. Returns the number stored.
    pub async fn upsert(&self, vectors: Vec<Vector>) -> Result<usize, PineconeError> {
        let host = self.resolve_host().await?;
        let mut stored = 0;
        for batch in vectors.chunks(UPSERT_BATCH) {
            let response = self
                .http
                .post(format!("{}/vectors/upsert", host))
                .header("Api-Key", self.api_key.expose())
                .header(API_VERSION_HEADER, API_VERSION)
                .json(&serde_json::json!({ "vectors": batch }))
                .send()
                .await?;
            let body: UpsertResponse = check_status(response).await?.json().await?;
            stored += body.upserted_count;
        }
        Ok(stored)
    }

    /// Delete every vector whose metadata matches `filter`
    pub async fn delete_matching(&self, filter: serde_json::Value) -> Result<(), PineconeError> {
        let host = self.resolve_host().await?;
        let response = self
            .http
            .post(format!("{}/vectors/delete", host))
            .header("Api-Key", self.api_key.expose())
            .header(API_VERSION_HEADER, API_VERSION)
            .json(&serde_json::json!({ "filter": filter }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Nearest neighbours of `vector`, metadata included
    pub async fn query(&self, vector: &[f32], top_k: u32) -> Result<Vec<Match>, PineconeError> {
        let host = self.resolve_host().await?;
        let response = self
            .http
            .post(format!("{}/query", host))
            .header("Api-Key", self.api_key.expose())
            .header(API_VERSION_HEADER, API_VERSION)
            .json(&serde_json::json!({
                "vector": vector,
                "topK": top_k,
                "includeMetadata": true,
            }))
            .send()
            .await?;
        let body: QueryResponse = check_status(response).await?.json().await?;
        Ok(body.matches)
    }
}

/// Hosts come back from the control plane without a scheme
fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PineconeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(PineconeError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_host_adds_scheme() {
        assert_eq!(
            normalize_host("idx-abc.svc.pinecone.io"),
            "https://idx-abc.svc.pinecone.io"
        );
        assert_eq!(normalize_host("http://127.0.0.1:9000/"), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_with_host_skips_discovery() {
        let client = PineconeClient::new(&PineconeConfig::default(), ApiKey::new("pc"))
            .unwrap()
            .with_host("http://127.0.0.1:1");
        assert_eq!(client.resolve_host().await.unwrap(), "http://127.0.0.1:1");
    }

    #[test]
    fn test_match_tolerates_missing_metadata() {
        let m: Match = serde_json::from_str(r#"{"id": "a", "score": 0.5}"#).unwrap();
        assert!(m.metadata.is_null());
    }
}
