//! Query orchestration: retrieve, filter, assemble context, generate.
//!
//! [`RagChain::query`] runs one question through a fixed sequence:
//! retrieve (query embedding included), empty-check, threshold filter,
//! context assembly, generation, respond. The boundary never raises:
//! every failure after the start still produces a [`QueryResponse`],
//! with the error carried in its `error` field and an apologetic answer
//! string. Exactly one [`QueryMetrics`] entry is recorded per query,
//! answered or failed.

use std::sync::Arc;
use std::time::Instant;

use crate::config::{PromptsConfig, RagConfig};
use crate::llm::CompletionClient;
use crate::metrics::MetricsCollector;
use crate::models::{QueryMetrics, QueryResponse, RetrievedDocument};
use crate::prompts;
use crate::retriever::Retriever;

pub struct RagChain {
    retriever: Box<dyn Retriever>,
    llm: Box<dyn CompletionClient>,
    metrics: Arc<MetricsCollector>,
    prompts: PromptsConfig,
    top_k: usize,
    min_relevance_score: f64,
}

impl RagChain {
    pub fn new(
        retriever: Box<dyn Retriever>,
        llm: Box<dyn CompletionClient>,
        metrics: Arc<MetricsCollector>,
        prompts: PromptsConfig,
        rag: &RagConfig,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            llm,
            metrics,
            prompts,
            top_k,
            min_relevance_score: rag.min_relevance_score,
        }
    }

    /// Answer one question. Never returns an error; failures are encoded
    /// in the response.
    pub async fn query(&self, question: &str, top_k: Option<usize>) -> QueryResponse {
        let start = Instant::now();
        let mut metrics = QueryMetrics::new(question);
        let k = top_k.unwrap_or(self.top_k);

        // Retrieve. An embedding failure inside the retriever is fatal
        // to this query; a search service failure comes back as an empty
        // list and falls through to the no-context answer.
        let retrieval_start = Instant::now();
        let documents = match self.retriever.retrieve(question, k).await {
            Ok(docs) => docs,
            Err(e) => {
                metrics.retrieval_time = retrieval_start.elapsed().as_secs_f64();
                metrics.total_time = start.elapsed().as_secs_f64();
                metrics.error = Some(e.to_string());
                self.metrics.record_query(metrics.clone());
                return failed_response(&e.to_string(), &metrics);
            }
        };
        metrics.retrieval_time = retrieval_start.elapsed().as_secs_f64();
        metrics.num_results = documents.len();

        // One unified empty transition: no hits, or nothing above the
        // configured relevance floor.
        let documents = filter_by_threshold(documents, self.min_relevance_score);
        if documents.is_empty() {
            metrics.total_time = start.elapsed().as_secs_f64();
            self.metrics.record_query(metrics.clone());
            return self.no_context_response(&metrics);
        }

        let context = prompts::format_context(&documents);
        let sources = prompts::format_sources(&documents);

        let generation_start = Instant::now();
        let completion = match self
            .llm
            .generate(
                &prompts::system_prompt(&self.prompts),
                &prompts::rag_prompt(&self.prompts, &context, question),
            )
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                metrics.generation_time = generation_start.elapsed().as_secs_f64();
                metrics.total_time = start.elapsed().as_secs_f64();
                metrics.error = Some(e.to_string());
                self.metrics.record_query(metrics.clone());
                return failed_response(&e.to_string(), &metrics);
            }
        };
        metrics.generation_time = generation_start.elapsed().as_secs_f64();
        metrics.tokens_used = completion.total_tokens;
        // Average raw score across the documents that made it into the
        // context, matching the summary semantics of the metrics log.
        metrics.relevance_score =
            Some(documents.iter().map(|d| d.score).sum::<f64>() / documents.len() as f64);
        metrics.total_time = start.elapsed().as_secs_f64();

        self.metrics.record_query(metrics.clone());

        QueryResponse {
            answer: completion.content,
            sources,
            relevance_scores: documents.iter().map(display_score).collect(),
            num_sources: documents.len(),
            source_documents: documents,
            retrieval_time: metrics.retrieval_time,
            generation_time: metrics.generation_time,
            total_time: metrics.total_time,
            tokens_used: metrics.tokens_used,
            error: None,
        }
    }

    /// Run the single-query flow once per question, in order. One
    /// question's failure never aborts the rest.
    pub async fn batch_query(&self, questions: &[String]) -> Vec<QueryResponse> {
        let mut responses = Vec::with_capacity(questions.len());
        for question in questions {
            responses.push(self.query(question, None).await);
        }
        responses
    }

    fn no_context_response(&self, metrics: &QueryMetrics) -> QueryResponse {
        QueryResponse {
            answer: prompts::no_context_answer(&self.prompts),
            sources: "No sources available.".to_string(),
            source_documents: Vec::new(),
            num_sources: 0,
            relevance_scores: Vec::new(),
            retrieval_time: metrics.retrieval_time,
            generation_time: 0.0,
            total_time: metrics.total_time,
            tokens_used: 0,
            error: None,
        }
    }
}

/// Drop documents below the relevance floor. A floor of zero keeps
/// everything, including zero-scored hits.
pub fn filter_by_threshold(
    documents: Vec<RetrievedDocument>,
    min_relevance_score: f64,
) -> Vec<RetrievedDocument> {
    if min_relevance_score <= 0.0 {
        return documents;
    }
    documents
        .into_iter()
        .filter(|d| d.score >= min_relevance_score)
        .collect()
}

/// The score shown to users: the reranker signal when present, the raw
/// search score otherwise. Threshold filtering always uses the raw score.
fn display_score(doc: &RetrievedDocument) -> f64 {
    doc.reranker_score.unwrap_or(doc.score)
}

fn failed_response(error: &str, metrics: &QueryMetrics) -> QueryResponse {
    QueryResponse {
        answer: format!(
            "An error occurred while processing your question: {}",
            error
        ),
        sources: "No sources available.".to_string(),
        source_documents: Vec::new(),
        num_sources: 0,
        relevance_scores: Vec::new(),
        retrieval_time: metrics.retrieval_time,
        generation_time: metrics.generation_time,
        total_time: metrics.total_time,
        tokens_used: 0,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use anyhow::{bail, Result};
    use async_trait::async_trait;

    fn doc(content: &str, score: f64) -> RetrievedDocument {
        RetrievedDocument {
            content: content.to_string(),
            source_file: "handbook.pdf".to_string(),
            page_number: 1,
            chunk_id: 0,
            score,
            reranker_score: None,
        }
    }

    /// Retriever returning a fixed document list, or failing outright.
    struct StaticRetriever {
        documents: Vec<RetrievedDocument>,
        fail: bool,
    }

    #[async_trait]
    impl Retriever for StaticRetriever {
        async fn retrieve(&self, _q: &str, _k: usize) -> Result<Vec<RetrievedDocument>> {
            if self.fail {
                bail!("embedding service unreachable");
            }
            Ok(self.documents.clone())
        }
    }

    /// Completion client that echoes, failing when the prompt mentions
    /// the configured trigger.
    struct EchoLlm {
        fail_on: Option<String>,
    }

    #[async_trait]
    impl CompletionClient for EchoLlm {
        async fn generate(&self, _system: &str, user: &str) -> Result<Completion> {
            if let Some(trigger) = &self.fail_on {
                if user.contains(trigger.as_str()) {
                    bail!("generation failed");
                }
            }
            Ok(Completion {
                content: "generated answer".to_string(),
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
                finish_reason: "stop".to_string(),
                model: "test".to_string(),
            })
        }
    }

    fn chain(
        documents: Vec<RetrievedDocument>,
        retriever_fails: bool,
        llm_fail_on: Option<&str>,
        min_relevance_score: f64,
    ) -> (RagChain, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new());
        let rag = RagConfig {
            min_relevance_score,
            ..RagConfig::default()
        };
        let chain = RagChain::new(
            Box::new(StaticRetriever {
                documents,
                fail: retriever_fails,
            }),
            Box::new(EchoLlm {
                fail_on: llm_fail_on.map(str::to_string),
            }),
            Arc::clone(&metrics),
            PromptsConfig::default(),
            &rag,
            5,
        );
        (chain, metrics)
    }

    #[tokio::test]
    async fn empty_retrieval_falls_back_to_no_context() {
        let (chain, metrics) = chain(vec![], false, None, 0.0);
        let response = chain.query("anything?", None).await;

        assert_eq!(response.num_sources, 0);
        assert_eq!(response.tokens_used, 0);
        assert_eq!(response.generation_time, 0.0);
        assert!(response.answer.starts_with("I apologize"));
        assert!(response.error.is_none());
        assert_eq!(metrics.summary().total_queries, 1);
    }

    #[tokio::test]
    async fn threshold_drops_low_scoring_documents() {
        let docs = vec![doc("a", 0.9), doc("b", 0.3), doc("c", 0.6)];
        let (chain, _) = chain(docs, false, None, 0.5);
        let response = chain.query("q", None).await;

        assert_eq!(response.num_sources, 2);
        assert_eq!(response.relevance_scores, vec![0.9, 0.6]);
        assert_eq!(response.answer, "generated answer");
        assert_eq!(response.tokens_used, 120);
    }

    #[tokio::test]
    async fn filter_emptying_results_uses_no_context_path() {
        let docs = vec![doc("a", 0.1), doc("b", 0.2)];
        let (chain, _) = chain(docs, false, None, 0.5);
        let response = chain.query("q", None).await;

        assert_eq!(response.num_sources, 0);
        assert_eq!(response.tokens_used, 0);
        assert!(response.answer.starts_with("I apologize"));
    }

    #[tokio::test]
    async fn retriever_failure_produces_failed_response() {
        let (chain, metrics) = chain(vec![], true, None, 0.0);
        let response = chain.query("q", None).await;

        assert!(response.error.is_some());
        assert!(response.answer.starts_with("An error occurred"));
        assert_eq!(metrics.summary().total_errors, 1);
    }

    #[tokio::test]
    async fn generation_failure_never_raises() {
        let docs = vec![doc("a", 0.9)];
        let (chain, metrics) = chain(docs, false, Some("q"), 0.0);
        let response = chain.query("q", None).await;

        assert_eq!(response.error.as_deref(), Some("generation failed"));
        assert_eq!(response.tokens_used, 0);
        assert_eq!(metrics.summary().error_rate, 100.0);
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_preserves_order() {
        let docs = vec![doc("a", 0.9)];
        let (chain, metrics) = chain(docs, false, Some("q1"), 0.0);
        let responses = chain
            .batch_query(&["q1".to_string(), "q2".to_string()])
            .await;

        assert_eq!(responses.len(), 2);
        assert!(responses[0].error.is_some());
        assert!(responses[1].error.is_none());
        assert_eq!(responses[1].answer, "generated answer");
        assert_eq!(metrics.summary().total_queries, 2);
        assert_eq!(metrics.summary().total_errors, 1);
    }

    #[tokio::test]
    async fn recorded_relevance_score_averages_surviving_documents() {
        let docs = vec![doc("a", 1.0), doc("b", 0.5)];
        let (chain, metrics) = chain(docs, false, None, 0.0);
        chain.query("q", None).await;

        let recorded = metrics.recent_queries(1);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].relevance_score, Some(0.75));
    }

    #[tokio::test]
    async fn reranker_score_preferred_for_display() {
        let mut d = doc("a", 0.4);
        d.reranker_score = Some(2.8);
        let (chain, _) = chain(vec![d], false, None, 0.0);
        let response = chain.query("q", None).await;

        assert_eq!(response.relevance_scores, vec![2.8]);
    }

    #[test]
    fn raising_threshold_never_grows_the_result() {
        let docs = vec![doc("a", 0.9), doc("b", 0.3), doc("c", 0.6)];
        let mut previous = usize::MAX;
        for threshold in [0.0, 0.2, 0.4, 0.7, 1.0] {
            let kept = filter_by_threshold(docs.clone(), threshold).len();
            assert!(kept <= previous);
            previous = kept;
        }
    }

    #[test]
    fn zero_threshold_keeps_zero_scored_documents() {
        let docs = vec![doc("a", 0.0)];
        assert_eq!(filter_by_threshold(docs, 0.0).len(), 1);
    }
}
