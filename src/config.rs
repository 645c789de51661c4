use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::splitter::ChunkingStrategy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub search: SearchConfig,
    pub ai: AiConfig,
    #[serde(default)]
    pub document_processing: DocumentProcessingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// Search service connection. The API key comes from `AZURE_SEARCH_KEY`,
/// never from the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub index_name: String,
    #[serde(default = "default_search_api_version")]
    pub api_version: String,
}

fn default_search_api_version() -> String {
    "2024-07-01".to_string()
}

/// AI service connection (embeddings + chat). The API key comes from
/// `AZURE_AI_KEY`.
#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    pub endpoint: String,
    pub chat_deployment: String,
    pub embedding_deployment: String,
    #[serde(default = "default_ai_api_version")]
    pub api_version: String,
}

fn default_ai_api_version() -> String {
    "2024-08-01-preview".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentProcessingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub chunking_strategy: ChunkingStrategy,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_max_retrieval_results")]
    pub max_retrieval_results: usize,
}

impl Default for DocumentProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            chunking_strategy: ChunkingStrategy::default(),
            embedding_dimension: default_embedding_dimension(),
            max_retrieval_results: default_max_retrieval_results(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_embedding_dimension() -> usize {
    1536
}
fn default_max_retrieval_results() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_embed_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embed_batch_size() -> usize {
    16
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_upload_batch_size")]
    pub batch_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_size: default_upload_batch_size(),
        }
    }
}

fn default_upload_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub min_relevance_score: f64,
    #[serde(default = "default_true")]
    pub enable_hybrid_search: bool,
    #[serde(default = "default_true")]
    pub enable_semantic_ranking: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            min_relevance_score: 0.0,
            enable_hybrid_search: true,
            enable_semantic_ranking: true,
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestionConfig {
    #[serde(default)]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

/// Optional prompt overrides; empty fields fall back to the built-in
/// defaults in [`crate::prompts`].
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptsConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub rag_prompt: Option<String>,
    #[serde(default)]
    pub no_context_prompt: Option<String>,
}

/// Read the search service API key from the environment.
pub fn search_api_key() -> Result<String> {
    std::env::var("AZURE_SEARCH_KEY").map_err(|_| {
        anyhow::anyhow!("AZURE_SEARCH_KEY environment variable not set")
    })
}

/// Read the AI service API key from the environment.
pub fn ai_api_key() -> Result<String> {
    std::env::var("AZURE_AI_KEY")
        .map_err(|_| anyhow::anyhow!("AZURE_AI_KEY environment variable not set"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.search.endpoint.is_empty() {
        anyhow::bail!("search.endpoint is required");
    }
    if config.search.index_name.is_empty() {
        anyhow::bail!("search.index_name is required");
    }
    if config.ai.endpoint.is_empty() {
        anyhow::bail!("ai.endpoint is required");
    }
    if config.ai.chat_deployment.is_empty() {
        anyhow::bail!("ai.chat_deployment is required");
    }
    if config.ai.embedding_deployment.is_empty() {
        anyhow::bail!("ai.embedding_deployment is required");
    }

    if config.document_processing.chunk_size == 0 {
        anyhow::bail!("document_processing.chunk_size must be > 0");
    }
    if config.document_processing.chunk_overlap >= config.document_processing.chunk_size {
        anyhow::bail!("document_processing.chunk_overlap must be < chunk_size");
    }
    if config.document_processing.embedding_dimension == 0 {
        anyhow::bail!("document_processing.embedding_dimension must be > 0");
    }
    if config.document_processing.max_retrieval_results == 0 {
        anyhow::bail!("document_processing.max_retrieval_results must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.upload.batch_size == 0 {
        anyhow::bail!("upload.batch_size must be > 0");
    }

    if !(0.0..=2.0).contains(&config.rag.temperature) {
        anyhow::bail!("rag.temperature must be in [0.0, 2.0]");
    }
    if config.rag.min_relevance_score < 0.0 {
        anyhow::bail!("rag.min_relevance_score must be >= 0");
    }

    Ok(config)
}
