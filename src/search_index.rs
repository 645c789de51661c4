//! Search index schema management and batched document upload.
//!
//! Talks to the search service's index REST API:
//! `PUT/GET/DELETE {endpoint}/indexes/{name}` for schema lifecycle and
//! `POST {endpoint}/indexes/{name}/docs/index` for uploads.
//!
//! `create` does not overwrite an existing index; callers decide whether
//! to delete first (the `--recreate` ingestion flag). `delete` tolerates
//! a missing index. Upload is best-effort per batch, mirroring the
//! embedding batch policy: one failed batch is logged and counted, the
//! remaining batches still run.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::{search_api_key, SearchConfig};
use crate::models::IndexRecord;
use crate::progress::{IngestPhase, IngestProgress};

/// Per-batch outcome of an upload run.
#[derive(Debug)]
pub struct UploadOutcome {
    /// Documents the service acknowledged as indexed.
    pub uploaded: usize,
    /// Documents in failed batches or rejected within a batch.
    pub failed: usize,
    pub batches_ok: usize,
    pub batches_failed: usize,
    pub first_error: Option<String>,
}

pub struct IndexManager {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    api_version: String,
}

const INDEX_API_TIMEOUT_SECS: u64 = 60;

impl IndexManager {
    pub fn new(search: &SearchConfig) -> Result<Self> {
        let api_key = search_api_key()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(INDEX_API_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            endpoint: search.endpoint.trim_end_matches('/').to_string(),
            api_key,
            api_version: search.api_version.clone(),
        })
    }

    fn index_url(&self, index_name: &str) -> String {
        index_url(&self.endpoint, index_name, &self.api_version)
    }

    /// Create the index with the fixed schema.
    ///
    /// Posts to the indexes collection, which is create-only: an existing
    /// index comes back as a 409 error rather than being overwritten.
    /// Callers that want a rebuild delete first.
    pub async fn create(&self, index_name: &str, dimension: usize) -> Result<()> {
        let schema = build_index_schema(index_name, dimension);

        let response = self
            .client
            .post(indexes_url(&self.endpoint, &self.api_version))
            .header("api-key", &self.api_key)
            .json(&schema)
            .send()
            .await
            .with_context(|| format!("Failed to reach search service at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Failed to create index '{}' ({}): {}", index_name, status, body);
        }

        Ok(())
    }

    /// Delete the index. A missing index is logged and ignored.
    pub async fn delete(&self, index_name: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.index_url(index_name))
            .header("api-key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to reach search service at {}", self.endpoint))?;

        let status = response.status();
        if status.as_u16() == 404 {
            eprintln!("Index '{}' does not exist, nothing to delete", index_name);
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Failed to delete index '{}' ({}): {}", index_name, status, body);
        }

        Ok(())
    }

    pub async fn exists(&self, index_name: &str) -> Result<bool> {
        let response = self
            .client
            .get(self.index_url(index_name))
            .header("api-key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to reach search service at {}", self.endpoint))?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status.as_u16() == 404 {
            return Ok(false);
        }

        let body = response.text().await.unwrap_or_default();
        bail!("Failed to check index '{}' ({}): {}", index_name, status, body);
    }

    /// Number of documents currently in the index.
    pub async fn document_count(&self, index_name: &str) -> Result<u64> {
        let url = format!(
            "{}/indexes/{}/docs/$count?api-version={}",
            self.endpoint, index_name, self.api_version
        );

        let response = self
            .client
            .get(url)
            .header("api-key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to reach search service at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Failed to count documents ({}): {}", status, body);
        }

        let text = response.text().await?;
        text.trim()
            .parse::<u64>()
            .with_context(|| format!("Unexpected document count response: {}", text))
    }

    /// Upload records in batches of at most `batch_size`.
    ///
    /// Every record's vector width is checked against `dimension` before
    /// anything is sent; a mismatch aborts the whole upload. After that,
    /// a failed batch is counted and skipped while later batches proceed.
    pub async fn upload(
        &self,
        index_name: &str,
        records: &[IndexRecord],
        batch_size: usize,
        dimension: usize,
        progress: &dyn IngestProgress,
    ) -> Result<UploadOutcome> {
        if let Some(bad) = records.iter().find(|r| r.content_vector.len() != dimension) {
            bail!(
                "Record '{}' has vector width {}, index expects {}",
                bad.id,
                bad.content_vector.len(),
                dimension
            );
        }

        let url = format!(
            "{}/indexes/{}/docs/index?api-version={}",
            self.endpoint, index_name, self.api_version
        );

        let total = records.len();
        let mut outcome = UploadOutcome {
            uploaded: 0,
            failed: 0,
            batches_ok: 0,
            batches_failed: 0,
            first_error: None,
        };
        let mut processed = 0u64;

        for batch in records.chunks(batch_size) {
            match self.upload_batch(&url, batch).await {
                Ok(succeeded) => {
                    outcome.uploaded += succeeded;
                    outcome.failed += batch.len() - succeeded;
                    outcome.batches_ok += 1;
                }
                Err(e) => {
                    eprintln!("Warning: upload batch failed: {}", e);
                    if outcome.first_error.is_none() {
                        outcome.first_error = Some(e.to_string());
                    }
                    outcome.failed += batch.len();
                    outcome.batches_failed += 1;
                }
            }

            processed += batch.len() as u64;
            progress.report(IngestPhase::Uploading, processed, total as u64);
        }

        Ok(outcome)
    }

    /// One `docs/index` call. Returns the number of documents the service
    /// acknowledged.
    async fn upload_batch(&self, url: &str, batch: &[IndexRecord]) -> Result<usize> {
        let actions: Vec<serde_json::Value> = batch
            .iter()
            .map(|record| {
                let mut value = serde_json::to_value(record).unwrap_or_default();
                if let Some(obj) = value.as_object_mut() {
                    obj.insert(
                        "@search.action".to_string(),
                        serde_json::Value::String("upload".to_string()),
                    );
                }
                value
            })
            .collect();

        let body = serde_json::json!({ "value": actions });

        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status.as_u16() != 207 {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Upload API error {}: {}", status, body_text);
        }

        // 207 means per-document statuses; count the acknowledged ones.
        let json: serde_json::Value = response.json().await?;
        let succeeded = json
            .get("value")
            .and_then(|v| v.as_array())
            .map(|results| {
                results
                    .iter()
                    .filter(|r| r.get("status").and_then(|s| s.as_bool()).unwrap_or(false))
                    .count()
            })
            .unwrap_or(batch.len());

        Ok(succeeded)
    }
}

/// URL of one named index: GET checks, DELETE removes.
fn index_url(endpoint: &str, index_name: &str, api_version: &str) -> String {
    format!(
        "{}/indexes/{}?api-version={}",
        endpoint, index_name, api_version
    )
}

/// URL of the indexes collection. POSTing a schema here creates a new
/// index and fails on a name collision, unlike a PUT to the named index
/// which would update the schema in place.
fn indexes_url(endpoint: &str, api_version: &str) -> String {
    format!("{}/indexes?api-version={}", endpoint, api_version)
}

/// The fixed index schema: a string key, searchable content, one vector
/// field whose width equals the embedding dimension, filterable source
/// attribution fields, and a semantic configuration prioritizing `title`
/// over `content` for reranking.
pub fn build_index_schema(index_name: &str, dimension: usize) -> serde_json::Value {
    serde_json::json!({
        "name": index_name,
        "fields": [
            { "name": "id", "type": "Edm.String", "key": true, "filterable": true },
            { "name": "content", "type": "Edm.String", "searchable": true },
            {
                "name": "content_vector",
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "dimensions": dimension,
                "vectorSearchProfile": "vector-profile"
            },
            { "name": "title", "type": "Edm.String", "searchable": true, "filterable": true },
            { "name": "source_file", "type": "Edm.String", "filterable": true, "facetable": true },
            { "name": "page_number", "type": "Edm.Int32", "filterable": true },
            { "name": "chunk_id", "type": "Edm.Int32", "filterable": true },
            { "name": "created_at", "type": "Edm.DateTimeOffset", "filterable": true, "sortable": true },
            { "name": "metadata", "type": "Edm.String", "filterable": false }
        ],
        "vectorSearch": {
            "algorithms": [
                {
                    "name": "hnsw-algorithm",
                    "kind": "hnsw",
                    "hnswParameters": {
                        "m": 4,
                        "efConstruction": 400,
                        "efSearch": 500,
                        "metric": "cosine"
                    }
                }
            ],
            "profiles": [
                { "name": "vector-profile", "algorithm": "hnsw-algorithm" }
            ]
        },
        "semantic": {
            "configurations": [
                {
                    "name": "semantic-config",
                    "prioritizedFields": {
                        "titleField": { "fieldName": "title" },
                        "prioritizedContentFields": [ { "fieldName": "content" } ]
                    }
                }
            ]
        }
    })
}
