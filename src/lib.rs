//! # DocQA
//!
//! A document question-answering pipeline over a hosted search index.
//!
//! DocQA ingests a folder of documents (text, Markdown, PDF, DOCX, HTML),
//! chunks and embeds them, uploads the results to an Azure AI Search
//! index, and answers questions with hybrid (keyword + vector) retrieval
//! followed by grounded generation through an Azure OpenAI deployment.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Loader   │──▶│ Split + Embed │──▶│ Search Index │
//! │ txt/pdf/… │   │   (batched)   │   │ (vector+kw)  │
//! └──────────┘   └───────────────┘   └──────┬───────┘
//!                                           │
//!                    question ──▶ retrieve ──┤
//!                                           ▼
//!                                  ┌─────────────┐
//!                                  │  RAG chain   │──▶ answer + citations
//!                                  └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export AZURE_SEARCH_KEY=... AZURE_AI_KEY=...
//! docqa check                       # verify service connectivity
//! docqa ingest ./docs               # chunk, embed, upload
//! docqa query "How many vacation days do employees get?"
//! docqa batch questions.txt --metrics-out metrics.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Document loading and text extraction |
//! | [`splitter`] | Chunking strategies |
//! | [`embedding`] | Batched embedding generation |
//! | [`search_index`] | Index schema management and upload |
//! | [`retriever`] | Hybrid document retrieval |
//! | [`rag`] | Query orchestration |
//! | [`metrics`] | Per-query metrics aggregation |

pub mod check;
pub mod config;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod progress;
pub mod prompts;
pub mod query_cmd;
pub mod rag;
pub mod retriever;
pub mod search_index;
pub mod splitter;
