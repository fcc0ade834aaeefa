//! Remote LLM text-generation client
//!
//! Thin wrapper over the hosted `/generate` endpoint, shared by the RAG
//! synthesizer and the optional ticker resolver.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Generate API error: {0}")]
    ApiError(String),

    #[error("Generate timeout after {0}s")]
    Timeout(u64),

    #[error("Generate response parsing error: {0}")]
    ParseError(String),
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    text: String,
}

pub struct GenerateClient {
    http_client: Client,
    base_url: String,
    timeout: Duration,
}

impl GenerateClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let http_client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build generate HTTP client: {}. Using defaults.", e);
                Client::default()
            });

        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, GenerateError> {
        let url = format!("{}/generate", self.base_url);
        let request = GenerateRequest { prompt, max_tokens, temperature };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerateError::Timeout(self.timeout.as_secs())
                } else {
                    GenerateError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerateError::ApiError(format!("API error {}: {}", status, body)));
        }

        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|e| GenerateError::ParseError(e.to_string()))?;

        Ok(reply.text)
    }
}
