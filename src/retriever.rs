//! Hybrid document retrieval.
//!
//! [`Retriever`] is the one-method seam the RAG chain depends on.
//! [`SearchRetriever`] implements it: embed the question, then run a
//! vector or hybrid query against `POST {endpoint}/indexes/{name}/docs/search`.
//!
//! Failure semantics are asymmetric on purpose: a query-embedding
//! failure is fatal and surfaces as `Err`, while a search service error
//! is logged and yields an empty result list so the orchestrator can
//! fall back to its no-context answer.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::{search_api_key, RagConfig, SearchConfig};
use crate::embedding::Embedder;
use crate::models::RetrievedDocument;

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Fetch the documents most relevant to `question`, best first.
    ///
    /// `Err` only for a query-embedding failure. A search service error
    /// returns `Ok` with an empty list.
    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<RetrievedDocument>>;
}

/// Retriever backed by the search index, in vector-only or hybrid mode.
///
/// The mode is fixed at construction from configuration: hybrid adds a
/// keyword clause to the vector query, and semantic ranking (hybrid only)
/// asks the service to rerank with its semantic model.
pub struct SearchRetriever {
    embedder: Embedder,
    client: reqwest::Client,
    search_url: String,
    api_key: String,
    hybrid: bool,
    semantic: bool,
}

const SEARCH_TIMEOUT_SECS: u64 = 30;

impl SearchRetriever {
    pub fn new(embedder: Embedder, search: &SearchConfig, rag: &RagConfig) -> Result<Self> {
        let api_key = search_api_key()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .build()?;

        let search_url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            search.endpoint.trim_end_matches('/'),
            search.index_name,
            search.api_version
        );

        Ok(Self {
            embedder,
            client,
            search_url,
            api_key,
            hybrid: rag.enable_hybrid_search,
            semantic: rag.enable_hybrid_search && rag.enable_semantic_ranking,
        })
    }

    async fn run_search(&self, body: &serde_json::Value) -> Result<Vec<RetrievedDocument>> {
        let response = self
            .client
            .post(&self.search_url)
            .header("api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| "Failed to reach search service")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Search API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(parse_search_response(&json))
    }
}

#[async_trait]
impl Retriever for SearchRetriever {
    async fn retrieve(&self, question: &str, top_k: usize) -> Result<Vec<RetrievedDocument>> {
        // Embedding failure aborts the query; the caller cannot search
        // without a vector.
        let vector = self.embedder.embed_one(question).await?;

        let body = build_search_request(question, &vector, top_k, self.hybrid, self.semantic);

        match self.run_search(&body).await {
            Ok(documents) => Ok(documents),
            Err(e) => {
                eprintln!("Warning: retrieval failed: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

/// Build the search request body for the configured mode.
pub fn build_search_request(
    question: &str,
    vector: &[f32],
    top_k: usize,
    hybrid: bool,
    semantic: bool,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "vectorQueries": [
            {
                "kind": "vector",
                "vector": vector,
                "fields": "content_vector",
                "k": top_k
            }
        ],
        "select": "content,source_file,page_number,chunk_id",
        "top": top_k
    });

    if hybrid {
        body["search"] = serde_json::Value::String(question.to_string());
        if semantic {
            body["queryType"] = serde_json::Value::String("semantic".to_string());
            body["semanticConfiguration"] =
                serde_json::Value::String("semantic-config".to_string());
        }
    }

    body
}

/// Normalize search hits into [`RetrievedDocument`]s, keeping the
/// service's ordering. Hits with no content are dropped.
pub fn parse_search_response(json: &serde_json::Value) -> Vec<RetrievedDocument> {
    let hits = match json.get("value").and_then(|v| v.as_array()) {
        Some(hits) => hits,
        None => return Vec::new(),
    };

    hits.iter()
        .filter_map(|hit| {
            let content = hit.get("content")?.as_str()?.to_string();
            Some(RetrievedDocument {
                content,
                source_file: hit
                    .get("source_file")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                page_number: hit
                    .get("page_number")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0) as i32,
                chunk_id: hit.get("chunk_id").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
                score: hit
                    .get("@search.score")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
                reranker_score: hit.get("@search.rerankerScore").and_then(|v| v.as_f64()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_only_request_has_no_keyword_clause() {
        let body = build_search_request("q", &[0.1, 0.2], 5, false, false);
        assert!(body.get("search").is_none());
        assert!(body.get("queryType").is_none());
        assert_eq!(body["vectorQueries"][0]["k"], 5);
        assert_eq!(body["vectorQueries"][0]["fields"], "content_vector");
        assert_eq!(body["top"], 5);
    }

    #[test]
    fn hybrid_request_includes_question_text() {
        let body = build_search_request("vacation days", &[0.1], 3, true, false);
        assert_eq!(body["search"], "vacation days");
        assert!(body.get("queryType").is_none());
    }

    #[test]
    fn semantic_ranking_sets_query_type() {
        let body = build_search_request("q", &[0.1], 3, true, true);
        assert_eq!(body["queryType"], "semantic");
        assert_eq!(body["semanticConfiguration"], "semantic-config");
    }

    #[test]
    fn parse_response_keeps_order_and_scores() {
        let json = serde_json::json!({
            "value": [
                {
                    "content": "first",
                    "source_file": "a.pdf",
                    "page_number": 2,
                    "chunk_id": 7,
                    "@search.score": 0.9,
                    "@search.rerankerScore": 2.5
                },
                {
                    "content": "second",
                    "source_file": "b.txt",
                    "page_number": 0,
                    "chunk_id": 0,
                    "@search.score": 0.4
                }
            ]
        });

        let docs = parse_search_response(&json);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].content, "first");
        assert_eq!(docs[0].score, 0.9);
        assert_eq!(docs[0].reranker_score, Some(2.5));
        assert_eq!(docs[1].source_file, "b.txt");
        assert_eq!(docs[1].reranker_score, None);
    }

    #[test]
    fn parse_response_drops_hits_without_content() {
        let json = serde_json::json!({
            "value": [
                { "source_file": "a.pdf", "@search.score": 0.9 },
                { "content": "kept", "@search.score": 0.5 }
            ]
        });

        let docs = parse_search_response(&json);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "kept");
    }

    #[test]
    fn parse_response_handles_missing_value() {
        let json = serde_json::json!({ "error": "bad" });
        assert!(parse_search_response(&json).is_empty());
    }
}
