//! Remote embedding service client

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("Embed API error: {0}")]
    ApiError(String),

    #[error("Embed timeout after {0}s")]
    Timeout(u64),

    #[error("Embed response parsing error: {0}")]
    ParseError(String),
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedReply {
    embedding: Vec<f32>,
}

pub struct EmbedClient {
    http_client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl EmbedClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Self {
        let http_client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build embed HTTP client: {}. Using defaults.", e);
                Client::default()
            });

        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/embed", self.base_url);
        let request = EmbedRequest { text, model: &self.model };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbedError::Timeout(self.timeout.as_secs())
                } else {
                    EmbedError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbedError::ApiError(format!("API error {}: {}", status, body)));
        }

        let reply: EmbedReply = response
            .json()
            .await
            .map_err(|e| EmbedError::ParseError(e.to_string()))?;

        if reply.embedding.is_empty() {
            return Err(EmbedError::ParseError("empty embedding in reply".to_string()));
        }

        Ok(reply.embedding)
    }
}
