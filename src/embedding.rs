//! Embedding generation with batching and partial-failure tolerance.
//!
//! [`EmbeddingBackend`] is the seam to the external embedding service;
//! [`AzureEmbeddingClient`] implements it against an Azure OpenAI
//! deployment with retry and exponential backoff. [`Embedder`] layers
//! the batching policy on top:
//!
//! - `embed_many` submits chunks in batches and tolerates per-batch
//!   failure — a failed batch leaves its chunks without vectors and the
//!   run continues, with the counts reported in [`EmbedOutcome`];
//! - `embed_one` (query-time) has no such tolerance and fails the call.
//!
//! The first successful batch asserts the service's vector width against
//! the configured dimension; a mismatch is a fatal ingestion error.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::{ai_api_key, AiConfig, EmbeddingConfig};
use crate::models::{Chunk, EmbeddedChunk};
use crate::progress::{IngestPhase, IngestProgress};

/// Seam to the external embedding service: one call per batch of texts,
/// returning one vector per input text in order.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Per-batch outcome of `embed_many`. Batch failures are a first-class
/// return value, not a log line.
#[derive(Debug)]
pub struct EmbedOutcome {
    /// Chunks with vectors attached, in input order.
    pub embedded: Vec<EmbeddedChunk>,
    /// Chunks from failed batches, left without vectors, in input order.
    pub skipped: Vec<Chunk>,
    pub batches_ok: usize,
    pub batches_failed: usize,
    pub first_error: Option<String>,
}

/// Batching policy over an [`EmbeddingBackend`].
pub struct Embedder {
    backend: Box<dyn EmbeddingBackend>,
    dimension: usize,
    batch_size: usize,
}

impl Embedder {
    pub fn new(backend: Box<dyn EmbeddingBackend>, dimension: usize, batch_size: usize) -> Self {
        Self {
            backend,
            dimension,
            batch_size,
        }
    }

    /// Embed a single query text. Any failure fails the call — there is
    /// no best-effort path at query time.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.backend.embed_batch(&[text.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;

        if vector.len() != self.dimension {
            bail!(
                "Embedding dimension mismatch: service returned {}, configured {}",
                vector.len(),
                self.dimension
            );
        }

        Ok(vector)
    }

    /// Embed chunks in batches of at most `batch_size`.
    ///
    /// A failed batch skips its chunks and the run continues with the
    /// next batch. Only a dimension mismatch on the first successful
    /// batch aborts the run, since every produced vector would be
    /// unusable.
    pub async fn embed_many(
        &self,
        chunks: Vec<Chunk>,
        progress: &dyn IngestProgress,
    ) -> Result<EmbedOutcome> {
        let total = chunks.len();
        let mut outcome = EmbedOutcome {
            embedded: Vec::with_capacity(total),
            skipped: Vec::new(),
            batches_ok: 0,
            batches_failed: 0,
            first_error: None,
        };
        let mut dimension_checked = false;
        let mut processed = 0u64;

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            match self.backend.embed_batch(&texts).await {
                Ok(vectors) => {
                    if vectors.len() != batch.len() {
                        bail!(
                            "Embedding service returned {} vectors for {} inputs",
                            vectors.len(),
                            batch.len()
                        );
                    }

                    if !dimension_checked {
                        if let Some(first) = vectors.first() {
                            if first.len() != self.dimension {
                                bail!(
                                    "Embedding dimension mismatch: service returned {}, configured {}",
                                    first.len(),
                                    self.dimension
                                );
                            }
                            dimension_checked = true;
                        }
                    }

                    for (chunk, vector) in batch.iter().cloned().zip(vectors) {
                        outcome.embedded.push(EmbeddedChunk { chunk, vector });
                    }
                    outcome.batches_ok += 1;
                }
                Err(e) => {
                    eprintln!("Warning: embedding batch failed: {}", e);
                    if outcome.first_error.is_none() {
                        outcome.first_error = Some(e.to_string());
                    }
                    outcome.skipped.extend(batch.iter().cloned());
                    outcome.batches_failed += 1;
                }
            }

            processed += batch.len() as u64;
            progress.report(IngestPhase::Embedding, processed, total as u64);
        }

        Ok(outcome)
    }
}

/// Embedding client for an Azure OpenAI deployment.
///
/// Calls `POST {endpoint}/openai/deployments/{deployment}/embeddings`
/// with the `api-key` header. The key comes from the `AZURE_AI_KEY`
/// environment variable.
pub struct AzureEmbeddingClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl AzureEmbeddingClient {
    pub fn new(ai: &AiConfig, embedding: &EmbeddingConfig) -> Result<Self> {
        let api_key = ai_api_key()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(embedding.timeout_secs))
            .build()?;

        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            ai.endpoint.trim_end_matches('/'),
            ai.embedding_deployment,
            ai.api_version
        );

        Ok(Self {
            client,
            url,
            api_key,
            max_retries: embedding.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for AzureEmbeddingClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "input": texts });
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embedding_response(&json);
                    }

                    if retryable_status(status) {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Retry classification shared by the HTTP clients: rate limiting and
/// server errors are transient, any other client error is permanent.
pub(crate) fn retryable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

/// Extract `data[].embedding` arrays from the embeddings API response,
/// in input order.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(i: i32, text: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            source_file: "doc.txt".to_string(),
            page_number: 0,
            title: "doc".to_string(),
            chunk_index: i,
            size: text.chars().count(),
        }
    }

    /// Backend that returns constant 3-dim vectors, failing on the
    /// batches whose (0-based) position is listed in `fail_batches`.
    struct ScriptedBackend {
        calls: AtomicUsize,
        fail_batches: Vec<usize>,
        dims: usize,
    }

    impl ScriptedBackend {
        fn new(fail_batches: Vec<usize>, dims: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_batches,
                dims,
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for ScriptedBackend {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_batches.contains(&call) {
                bail!("service unavailable");
            }
            Ok(texts.iter().map(|_| vec![0.5; self.dims]).collect())
        }
    }

    #[tokio::test]
    async fn second_batch_failure_skips_only_that_batch() {
        let embedder = Embedder::new(Box::new(ScriptedBackend::new(vec![1], 3)), 3, 2);
        let chunks = vec![chunk(0, "a"), chunk(1, "b"), chunk(2, "c"), chunk(3, "d")];

        let outcome = embedder.embed_many(chunks, &NoProgress).await.unwrap();

        assert_eq!(outcome.embedded.len(), 2);
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.batches_ok, 1);
        assert_eq!(outcome.batches_failed, 1);
        assert!(outcome.first_error.is_some());

        // Batch 1 succeeded, batch 2 skipped, input order preserved.
        assert_eq!(outcome.embedded[0].chunk.chunk_index, 0);
        assert_eq!(outcome.embedded[1].chunk.chunk_index, 1);
        assert_eq!(outcome.skipped[0].chunk_index, 2);
        assert_eq!(outcome.skipped[1].chunk_index, 3);
    }

    #[tokio::test]
    async fn all_batches_succeeding_skips_nothing() {
        let embedder = Embedder::new(Box::new(ScriptedBackend::new(vec![], 3)), 3, 2);
        let chunks = vec![chunk(0, "a"), chunk(1, "b"), chunk(2, "c")];

        let outcome = embedder.embed_many(chunks, &NoProgress).await.unwrap();
        assert_eq!(outcome.embedded.len(), 3);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.batches_ok, 2); // 2 + 1
        assert_eq!(outcome.batches_failed, 0);
        assert!(outcome.first_error.is_none());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_fatal() {
        let embedder = Embedder::new(Box::new(ScriptedBackend::new(vec![], 4)), 1536, 16);
        let result = embedder.embed_many(vec![chunk(0, "a")], &NoProgress).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn embed_one_propagates_failure() {
        let embedder = Embedder::new(Box::new(ScriptedBackend::new(vec![0], 3)), 3, 16);
        assert!(embedder.embed_one("question").await.is_err());
    }

    #[tokio::test]
    async fn embed_one_returns_single_vector() {
        let embedder = Embedder::new(Box::new(ScriptedBackend::new(vec![], 3)), 3, 16);
        let v = embedder.embed_one("question").await.unwrap();
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn parse_response_preserves_order() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [1.0, 2.0] },
                { "embedding": [3.0, 4.0] }
            ]
        });
        let parsed = parse_embedding_response(&json).unwrap();
        assert_eq!(parsed, vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn parse_response_rejects_missing_data() {
        let json = serde_json::json!({ "error": "nope" });
        assert!(parse_embedding_response(&json).is_err());
    }

    #[test]
    fn retry_classification() {
        use reqwest::StatusCode;
        assert!(retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!retryable_status(StatusCode::BAD_REQUEST));
        assert!(!retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!retryable_status(StatusCode::NOT_FOUND));
    }
}
