//! Ingestion pipeline: load, chunk, embed, provision, upload.
//!
//! Drives the full path from a documents folder to a populated search
//! index. Batch-level failures (embedding, upload) are tolerated and
//! reported in the final [`IngestReport`]; setup failures (missing
//! folder, index provisioning, dimension mismatch) abort the run.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{AzureEmbeddingClient, Embedder};
use crate::loader::DocumentLoader;
use crate::models::{EmbeddedChunk, IndexRecord};
use crate::progress::IngestProgress;
use crate::search_index::IndexManager;
use crate::splitter::{chunk_stats, ChunkingStrategy, TextSplitter};

/// Per-run overrides for the ingestion pipeline. Unset fields fall back
/// to the loaded configuration.
#[derive(Debug, Default)]
pub struct IngestOptions {
    pub index_name: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub strategy: Option<ChunkingStrategy>,
    pub recreate_index: bool,
    /// Load and chunk only; skip embedding, provisioning, and upload.
    pub dry_run: bool,
}

/// What actually happened during one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub skipped_chunks: usize,
    pub uploaded: usize,
    pub failed_uploads: usize,
}

pub async fn run_ingest(
    config: &Config,
    docs_folder: &Path,
    options: &IngestOptions,
    progress: &dyn IngestProgress,
) -> Result<IngestReport> {
    let index_name = options
        .index_name
        .clone()
        .unwrap_or_else(|| config.search.index_name.clone());
    let chunk_size = options
        .chunk_size
        .unwrap_or(config.document_processing.chunk_size);
    let chunk_overlap = options
        .chunk_overlap
        .unwrap_or(config.document_processing.chunk_overlap);
    let dimension = config.document_processing.embedding_dimension;

    // CLI overrides bypass config loading, so the chunking invariants
    // must hold here too.
    if chunk_size == 0 {
        anyhow::bail!("chunk size must be > 0");
    }
    if chunk_overlap >= chunk_size {
        anyhow::bail!(
            "chunk overlap must be smaller than chunk size ({} >= {})",
            chunk_overlap,
            chunk_size
        );
    }

    // Load. A missing folder is fatal; an empty one is only a warning.
    let loader = DocumentLoader::new(&config.ingestion)?;
    let documents = loader.load_directory(docs_folder)?;
    if documents.is_empty() {
        eprintln!(
            "Warning: no supported documents found in {}",
            docs_folder.display()
        );
        return Ok(IngestReport::default());
    }
    println!(
        "Loaded {} pages from {}",
        documents.len(),
        docs_folder.display()
    );

    // Chunk.
    let strategy = options
        .strategy
        .unwrap_or(config.document_processing.chunking_strategy);
    let splitter = TextSplitter::new(strategy, chunk_size, chunk_overlap);
    let chunks = splitter.split_documents(&documents);
    let stats = chunk_stats(&chunks);
    println!(
        "Split into {} chunks (avg {:.0} chars, min {}, max {})",
        stats.total, stats.avg_size, stats.min_size, stats.max_size
    );

    if options.dry_run {
        println!("Dry run: skipping embedding and upload");
        return Ok(IngestReport {
            documents: documents.len(),
            chunks: chunks.len(),
            ..IngestReport::default()
        });
    }

    // Embed, tolerating per-batch failure.
    let backend = AzureEmbeddingClient::new(&config.ai, &config.embedding)?;
    let embedder = Embedder::new(Box::new(backend), dimension, config.embedding.batch_size);
    let total_chunks = chunks.len();
    let outcome = embedder.embed_many(chunks, progress).await?;
    if outcome.batches_failed > 0 {
        eprintln!(
            "Warning: {} embedding batch(es) failed, {} chunks skipped (first error: {})",
            outcome.batches_failed,
            outcome.skipped.len(),
            outcome.first_error.as_deref().unwrap_or("unknown")
        );
    }
    if outcome.embedded.is_empty() {
        anyhow::bail!("All embedding batches failed, nothing to upload");
    }

    // Provision the index. Create only when absent, unless a rebuild was
    // requested.
    let manager = IndexManager::new(&config.search)?;
    if options.recreate_index {
        manager.delete(&index_name).await?;
        manager.create(&index_name, dimension).await?;
        println!("Recreated index '{}'", index_name);
    } else if !manager.exists(&index_name).await? {
        manager.create(&index_name, dimension).await?;
        println!("Created index '{}'", index_name);
    }

    // Upload.
    let records = build_records(&outcome.embedded);
    let upload = manager
        .upload(
            &index_name,
            &records,
            config.upload.batch_size,
            dimension,
            progress,
        )
        .await?;
    if upload.batches_failed > 0 {
        eprintln!(
            "Warning: {} upload batch(es) failed (first error: {})",
            upload.batches_failed,
            upload.first_error.as_deref().unwrap_or("unknown")
        );
    }

    let report = IngestReport {
        documents: documents.len(),
        chunks: total_chunks,
        embedded: outcome.embedded.len(),
        skipped_chunks: outcome.skipped.len(),
        uploaded: upload.uploaded,
        failed_uploads: upload.failed,
    };

    println!(
        "Ingestion complete: {} pages, {} chunks, {} embedded, {} uploaded to '{}'",
        report.documents, report.chunks, report.embedded, report.uploaded, index_name
    );
    if report.skipped_chunks > 0 || report.failed_uploads > 0 {
        eprintln!(
            "Warning: {} chunks skipped at embedding, {} failed at upload",
            report.skipped_chunks, report.failed_uploads
        );
    }

    Ok(report)
}

/// Turn embedded chunks into index records.
///
/// Ids must stay unique across re-ingestions of the same corpus, so the
/// identity hash is salted with a random component. `created_at` is the
/// upload timestamp in ISO-8601 UTC.
pub fn build_records(embedded: &[EmbeddedChunk]) -> Vec<IndexRecord> {
    let created_at = Utc::now().to_rfc3339();

    embedded
        .iter()
        .map(|e| {
            let identity = format!(
                "{}-{}-{}-{}",
                e.chunk.source_file,
                e.chunk.page_number,
                e.chunk.chunk_index,
                Uuid::new_v4()
            );
            let id = format!("{:x}", Sha256::digest(identity.as_bytes()));

            let metadata = serde_json::json!({
                "size": e.chunk.size,
            })
            .to_string();

            IndexRecord {
                id,
                content: e.chunk.text.clone(),
                content_vector: e.vector.clone(),
                title: e.chunk.title.clone(),
                source_file: e.chunk.source_file.clone(),
                page_number: e.chunk.page_number,
                chunk_id: e.chunk.chunk_index,
                created_at: created_at.clone(),
                metadata,
            }
        })
        .collect()
}
