//! Core data models for the ingestion and query pipeline.
//!
//! These types flow between the loader, splitter, embedder, index manager,
//! retriever, and RAG chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of text produced by the document loader, before chunking.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// File name (not the full path) of the originating document.
    pub source_file: String,
    /// Page within the source file; 0 for single-page formats.
    pub page_number: i32,
    /// Title derived from the first line or the file stem.
    pub title: String,
    pub content: String,
}

/// A bounded span of document text prepared for embedding.
///
/// Immutable once created. `chunk_index` is 0-based and unique within the
/// source document; `size` is the character length of `text`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub source_file: String,
    pub page_number: i32,
    pub title: String,
    pub chunk_index: i32,
    pub size: usize,
}

/// A chunk with its embedding vector attached.
///
/// The vector length always equals the configured embedding dimension;
/// the embedder asserts this once per run before any chunk is produced.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// The persisted unit uploaded to the search index.
///
/// `id` is globally unique across re-ingestions of the same corpus and
/// immutable thereafter; records are only removed by deleting the index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexRecord {
    pub id: String,
    pub content: String,
    pub content_vector: Vec<f32>,
    pub title: String,
    pub source_file: String,
    pub page_number: i32,
    pub chunk_id: i32,
    /// ISO-8601 UTC timestamp assigned at upload time.
    pub created_at: String,
    /// Opaque string-serialized metadata; not filterable in the index.
    pub metadata: String,
}

/// A search hit normalized into a uniform shape.
///
/// `score` is the raw relevance signal from the search service and is the
/// value checked by threshold filtering. `reranker_score`, when present,
/// is the semantic reranking signal and takes precedence for display.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub source_file: String,
    pub page_number: i32,
    pub chunk_id: i32,
    pub score: f64,
    pub reranker_score: Option<f64>,
}

/// Response object returned by the RAG chain for every query.
///
/// The query boundary never raises: failures surface here through the
/// `error` field and an apologetic answer string.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: String,
    pub source_documents: Vec<RetrievedDocument>,
    pub num_sources: usize,
    pub relevance_scores: Vec<f64>,
    pub retrieval_time: f64,
    pub generation_time: f64,
    pub total_time: f64,
    pub tokens_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Timing, token, and error statistics for one query call.
///
/// Created at query start, mutated through the query lifecycle, and
/// appended to the [`MetricsCollector`](crate::metrics::MetricsCollector)
/// exactly once, on success or on failure.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetrics {
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub retrieval_time: f64,
    pub generation_time: f64,
    pub total_time: f64,
    pub num_results: usize,
    pub tokens_used: u32,
    pub relevance_score: Option<f64>,
    pub error: Option<String>,
}

impl QueryMetrics {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            timestamp: Utc::now(),
            retrieval_time: 0.0,
            generation_time: 0.0,
            total_time: 0.0,
            num_results: 0,
            tokens_used: 0,
            relevance_score: None,
            error: None,
        }
    }
}
