//! Chat completion client for answer generation.
//!
//! [`CompletionClient`] is the seam used by the RAG chain so tests can
//! substitute a scripted generator. [`AzureChatClient`] implements it
//! against an Azure OpenAI chat deployment, with the same retry policy
//! as the embedding client (retry 429/5xx/network, fail fast on other
//! 4xx, exponential backoff).

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::{ai_api_key, AiConfig, RagConfig};
use crate::embedding::retryable_status;

/// One generated answer plus the usage metadata the service reported.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub finish_reason: String,
    pub model: String,
}

/// Seam to the chat completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion>;
}

/// Chat client for an Azure OpenAI deployment.
///
/// Calls `POST {endpoint}/openai/deployments/{deployment}/chat/completions`
/// with the `api-key` header. The key comes from the `AZURE_AI_KEY`
/// environment variable.
pub struct AzureChatClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
    max_retries: u32,
}

const CHAT_TIMEOUT_SECS: u64 = 60;

impl AzureChatClient {
    pub fn new(ai: &AiConfig, rag: &RagConfig, max_retries: u32) -> Result<Self> {
        let api_key = ai_api_key()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CHAT_TIMEOUT_SECS))
            .build()?;

        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            ai.endpoint.trim_end_matches('/'),
            ai.chat_deployment,
            ai.api_version
        );

        Ok(Self {
            client,
            url,
            api_key,
            temperature: rag.temperature,
            max_tokens: rag.max_tokens,
            max_retries,
        })
    }

    /// Probe the deployment with a one-token request. Used by `docqa check`.
    pub async fn validate_deployment(&self) -> Result<()> {
        let body = serde_json::json!({
            "messages": [{ "role": "user", "content": "ping" }],
            "max_tokens": 1
        });

        let response = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Chat deployment check failed {}: {}", status, body_text);
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionClient for AzureChatClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<Completion> {
        let body = serde_json::json!({
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("api-key", &self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion_response(&json);
                    }

                    if retryable_status(status) {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Chat API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Chat API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
    }
}

fn parse_completion_response(json: &serde_json::Value) -> Result<Completion> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices"))?;

    let content = choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing message content"))?
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|f| f.as_str())
        .unwrap_or("unknown")
        .to_string();

    let usage = json.get("usage");
    let usage_field = |name: &str| -> u32 {
        usage
            .and_then(|u| u.get(name))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    };

    Ok(Completion {
        content,
        prompt_tokens: usage_field("prompt_tokens"),
        completion_tokens: usage_field("completion_tokens"),
        total_tokens: usage_field("total_tokens"),
        finish_reason,
        model: json
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown")
            .to_string(),
    })
}

/// Rough token estimate for budgeting: about 4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_completion_extracts_content_and_usage() {
        let json = serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": { "role": "assistant", "content": "The answer." },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 30,
                "total_tokens": 150
            }
        });

        let completion = parse_completion_response(&json).unwrap();
        assert_eq!(completion.content, "The answer.");
        assert_eq!(completion.prompt_tokens, 120);
        assert_eq!(completion.completion_tokens, 30);
        assert_eq!(completion.total_tokens, 150);
        assert_eq!(completion.finish_reason, "stop");
        assert_eq!(completion.model, "gpt-4o-2024-08-06");
    }

    #[test]
    fn parse_completion_tolerates_missing_usage() {
        let json = serde_json::json!({
            "choices": [{
                "message": { "content": "ok" }
            }]
        });

        let completion = parse_completion_response(&json).unwrap();
        assert_eq!(completion.content, "ok");
        assert_eq!(completion.total_tokens, 0);
        assert_eq!(completion.finish_reason, "unknown");
    }

    #[test]
    fn parse_completion_rejects_empty_choices() {
        let json = serde_json::json!({ "choices": [] });
        assert!(parse_completion_response(&json).is_err());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
