//! Connectivity checks for the configured services.
//!
//! `docqa check` probes the search service (index reachable, document
//! count) and the chat deployment (one-token completion). Each probe is
//! reported independently; the command exits non-zero when any fails.

use anyhow::Result;

use crate::config::Config;
use crate::llm::AzureChatClient;
use crate::search_index::IndexManager;

/// Probe each external dependency, printing one line per check.
/// Returns `true` when everything passed.
pub async fn run_check(config: &Config) -> Result<bool> {
    let mut all_ok = true;

    match IndexManager::new(&config.search) {
        Ok(manager) => match manager.exists(&config.search.index_name).await {
            Ok(true) => {
                let count = manager
                    .document_count(&config.search.index_name)
                    .await
                    .unwrap_or(0);
                println!(
                    "search: ok (index '{}', {} documents)",
                    config.search.index_name, count
                );
            }
            Ok(false) => {
                println!(
                    "search: reachable, index '{}' does not exist yet",
                    config.search.index_name
                );
            }
            Err(e) => {
                println!("search: FAILED ({})", e);
                all_ok = false;
            }
        },
        Err(e) => {
            println!("search: FAILED ({})", e);
            all_ok = false;
        }
    }

    match AzureChatClient::new(&config.ai, &config.rag, config.embedding.max_retries) {
        Ok(client) => match client.validate_deployment().await {
            Ok(()) => {
                println!("chat: ok (deployment '{}')", config.ai.chat_deployment);
            }
            Err(e) => {
                println!("chat: FAILED ({})", e);
                all_ok = false;
            }
        },
        Err(e) => {
            println!("chat: FAILED ({})", e);
            all_ok = false;
        }
    }

    Ok(all_ok)
}
