//! # DocQA CLI (`docqa`)
//!
//! The `docqa` binary drives the document question-answering pipeline:
//! ingestion into the search index, single and batch queries, index
//! lifecycle management, and connectivity checks.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa ingest <folder>` | Load, chunk, embed, and upload documents |
//! | `docqa query "<question>"` | Answer one question with citations |
//! | `docqa batch <file>` | Answer one question per line of a file |
//! | `docqa index create` | Create the search index |
//! | `docqa index delete` | Delete the search index |
//! | `docqa index status` | Show index existence and document count |
//! | `docqa check` | Probe the configured services |
//!
//! API keys are read from the `AZURE_SEARCH_KEY` and `AZURE_AI_KEY`
//! environment variables, never from the config file.
//!
//! ## Examples
//!
//! ```bash
//! # Ingest a docs folder, rebuilding the index from scratch
//! docqa ingest ./docs --recreate-index
//!
//! # Ask a question, JSON output for scripting
//! docqa query "What is the refund policy?" --json
//!
//! # Run a question file and export per-query metrics
//! docqa batch questions.txt --metrics-out metrics.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use docqa::config;
use docqa::progress::ProgressMode;
use docqa::splitter::ChunkingStrategy;
use docqa::{check, ingest, query_cmd, search_index};

/// DocQA — document question answering over a hosted search index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "DocQA — document question answering over a hosted search index",
    version,
    long_about = "DocQA ingests documents (text, Markdown, PDF, DOCX, HTML), chunks and embeds \
    them into an Azure AI Search index, and answers questions with hybrid retrieval followed by \
    grounded generation through an Azure OpenAI deployment."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Progress output on stderr during ingestion.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Auto,
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Auto => ProgressMode::default_for_tty(),
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest a folder of documents into the search index.
    ///
    /// Loads every supported file, chunks and embeds the text, provisions
    /// the index if it does not exist, and uploads the records in batches.
    /// Embedding and upload are best-effort per batch; failures are
    /// reported in the summary.
    Ingest {
        /// Folder containing the documents to ingest.
        docs_folder: PathBuf,

        /// Override the index name from config.
        #[arg(long)]
        index_name: Option<String>,

        /// Override the chunk size from config (characters).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override the chunk overlap from config (characters).
        #[arg(long)]
        chunk_overlap: Option<usize>,

        /// Override the chunking strategy from config.
        #[arg(long, value_enum)]
        strategy: Option<ChunkingStrategy>,

        /// Delete and recreate the index before uploading.
        #[arg(long)]
        recreate_index: bool,

        /// Load and chunk only; print stats without embedding or uploading.
        #[arg(long)]
        dry_run: bool,

        /// Progress output: auto (TTY detection), off, human, or json.
        #[arg(long, value_enum, default_value = "auto")]
        progress: ProgressArg,
    },

    /// Answer a single question.
    ///
    /// Retrieves the most relevant chunks, assembles them into a context
    /// block, and generates a grounded answer with citations.
    Query {
        /// The question to answer.
        question: String,

        /// Number of documents to retrieve (default from config).
        #[arg(long)]
        top_k: Option<usize>,

        /// Override the minimum relevance score from config.
        #[arg(long)]
        min_score: Option<f64>,

        /// Suppress the source citations block.
        #[arg(long)]
        no_sources: bool,

        /// Print the full response object as JSON.
        #[arg(long)]
        json: bool,

        /// Write the metrics export to this file.
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Answer one question per line of a file.
    ///
    /// Questions run sequentially; one failure does not stop the rest.
    /// A summary of latency, tokens, and errors is printed at the end.
    Batch {
        /// File with one question per line (blank lines skipped).
        questions_file: PathBuf,

        /// Number of documents to retrieve per question (default from config).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print all response objects as JSON.
        #[arg(long)]
        json: bool,

        /// Write the collected metrics export to this file.
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Manage the search index.
    Index {
        #[command(subcommand)]
        action: IndexAction,

        /// Override the index name from config.
        #[arg(long, global = true)]
        index_name: Option<String>,
    },

    /// Probe the configured search and chat services.
    ///
    /// Exits non-zero when any probe fails.
    Check,
}

/// Index lifecycle subcommands.
#[derive(Subcommand)]
enum IndexAction {
    /// Create the index with the fixed schema. Fails if it already exists.
    Create,
    /// Delete the index. A missing index is not an error.
    Delete,
    /// Show whether the index exists and how many documents it holds.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            docs_folder,
            index_name,
            chunk_size,
            chunk_overlap,
            strategy,
            recreate_index,
            dry_run,
            progress,
        } => {
            let options = ingest::IngestOptions {
                index_name,
                chunk_size,
                chunk_overlap,
                strategy,
                recreate_index,
                dry_run,
            };
            let reporter = progress.mode().reporter();
            ingest::run_ingest(&cfg, &docs_folder, &options, reporter.as_ref()).await?;
        }
        Commands::Query {
            question,
            top_k,
            min_score,
            no_sources,
            json,
            metrics_out,
        } => {
            query_cmd::run_query(
                &cfg,
                &question,
                top_k,
                min_score,
                !no_sources,
                json,
                metrics_out.as_deref(),
            )
            .await?;
        }
        Commands::Batch {
            questions_file,
            top_k,
            json,
            metrics_out,
        } => {
            query_cmd::run_batch(&cfg, &questions_file, top_k, json, metrics_out.as_deref())
                .await?;
        }
        Commands::Index { action, index_name } => {
            let manager = search_index::IndexManager::new(&cfg.search)?;
            let index_name = index_name.as_deref().unwrap_or(&cfg.search.index_name);
            match action {
                IndexAction::Create => {
                    manager
                        .create(index_name, cfg.document_processing.embedding_dimension)
                        .await?;
                    println!("Created index '{}'", index_name);
                }
                IndexAction::Delete => {
                    manager.delete(index_name).await?;
                    println!("Deleted index '{}'", index_name);
                }
                IndexAction::Status => {
                    if manager.exists(index_name).await? {
                        let count = manager.document_count(index_name).await?;
                        println!("Index '{}' exists with {} documents", index_name, count);
                    } else {
                        println!("Index '{}' does not exist", index_name);
                    }
                }
            }
        }
        Commands::Check => {
            if !check::run_check(&cfg).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
