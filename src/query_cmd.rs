//! `docqa query` and `docqa batch` command implementations.
//!
//! Wires the concrete Azure clients into a [`RagChain`] and prints
//! answers. Batch mode reads one question per line and can export the
//! collected metrics as JSON afterwards.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::embedding::{AzureEmbeddingClient, Embedder};
use crate::llm::AzureChatClient;
use crate::metrics::MetricsCollector;
use crate::models::QueryResponse;
use crate::rag::RagChain;
use crate::retriever::SearchRetriever;

/// Build a RAG chain from configuration, backed by the live services.
pub fn build_chain(config: &Config) -> Result<(RagChain, Arc<MetricsCollector>)> {
    let backend = AzureEmbeddingClient::new(&config.ai, &config.embedding)?;
    let embedder = Embedder::new(
        Box::new(backend),
        config.document_processing.embedding_dimension,
        config.embedding.batch_size,
    );
    let retriever = SearchRetriever::new(embedder, &config.search, &config.rag)?;
    let llm = AzureChatClient::new(&config.ai, &config.rag, config.embedding.max_retries)?;

    let metrics = Arc::new(MetricsCollector::new());
    let chain = RagChain::new(
        Box::new(retriever),
        Box::new(llm),
        Arc::clone(&metrics),
        config.prompts.clone(),
        &config.rag,
        config.document_processing.max_retrieval_results,
    );

    Ok((chain, metrics))
}

pub async fn run_query(
    config: &Config,
    question: &str,
    top_k: Option<usize>,
    min_score: Option<f64>,
    show_sources: bool,
    json: bool,
    metrics_out: Option<&Path>,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(min_score) = min_score {
        config.rag.min_relevance_score = min_score;
    }

    let (chain, metrics) = build_chain(&config)?;
    let response = chain.query(question, top_k).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response, show_sources);
    }

    if let Some(path) = metrics_out {
        metrics.export_to_file(path)?;
        println!("Metrics written to {}", path.display());
    }

    Ok(())
}

pub async fn run_batch(
    config: &Config,
    questions_file: &Path,
    top_k: Option<usize>,
    json: bool,
    metrics_out: Option<&Path>,
) -> Result<()> {
    let content = std::fs::read_to_string(questions_file)
        .with_context(|| format!("Failed to read {}", questions_file.display()))?;
    let questions: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    if questions.is_empty() {
        eprintln!("Warning: no questions in {}", questions_file.display());
        return Ok(());
    }

    let mut config = config.clone();
    if let Some(top_k) = top_k {
        config.document_processing.max_retrieval_results = top_k;
    }

    let (chain, metrics) = build_chain(&config)?;
    let responses = chain.batch_query(&questions).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&responses)?);
    } else {
        for (question, response) in questions.iter().zip(&responses) {
            println!("Q: {}", question);
            print_response(response, true);
            println!();
        }

        let summary = metrics.summary();
        println!(
            "{} queries, {} tokens, {} errors, avg latency {:.2}s",
            summary.total_queries, summary.total_tokens, summary.total_errors, summary.avg_latency
        );
    }

    if let Some(path) = metrics_out {
        metrics.export_to_file(path)?;
        println!("Metrics written to {}", path.display());
    }

    Ok(())
}

fn print_response(response: &QueryResponse, show_sources: bool) {
    println!("{}", response.answer);

    if show_sources && response.num_sources > 0 {
        println!("\nSources:\n{}", response.sources);
    }
    println!(
        "\n({} sources, retrieval {:.2}s, generation {:.2}s, {} tokens)",
        response.num_sources,
        response.retrieval_time,
        response.generation_time,
        response.tokens_used
    );
    if let Some(error) = &response.error {
        eprintln!("Error: {}", error);
    }
}
