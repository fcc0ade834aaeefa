//! Remote LLM classifier client
//!
//! Posts documents to the hosted classify service and validates the strict
//! JSON reply contract. Transient failures (network, 5xx, rate limit) are
//! retried with exponential backoff; 4xx and schema violations are not.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::Classification;
use crate::models::{ClassificationMethod, RiskLabel};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;

/// Classifier service errors
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classify API error: {0}")]
    ApiError(String),

    #[error("Classify API rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Classify response parsing error: {0}")]
    ParseError(String),

    #[error("Classify timeout after {0}s")]
    Timeout(u64),

    #[error("Classify rate limited, retry after {0}s")]
    RateLimited(u64),
}

impl ClassifierError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_) | Self::ApiError(_))
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
    title: &'a str,
    source: &'a str,
    section: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyReply {
    label: String,
    reason: Option<String>,
    confidence: f64,
    #[allow(dead_code)]
    method: Option<String>,
}

#[derive(Debug, Serialize)]
struct BatchClassifyRequest<'a> {
    documents: Vec<ClassifyRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct BatchClassifyReply {
    results: Vec<ClassifyReply>,
}

/// One document in a batch classify call.
#[derive(Debug, Clone, Default)]
pub struct ClassifyInput {
    pub text: String,
    pub title: String,
    pub source: String,
    pub section: String,
}

pub struct LlmClassifier {
    http_client: Client,
    base_url: String,
    timeout: Duration,
}

impl LlmClassifier {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let http_client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build classify HTTP client: {}. Using defaults.", e);
                Client::default()
            });

        Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Classify a single document.
    pub async fn classify(
        &self,
        text: &str,
        title: &str,
        source: &str,
        section: &str,
    ) -> Result<Classification, ClassifierError> {
        let request = ClassifyRequest { text, title, source, section };
        let url = format!("{}/classify", self.base_url);

        let reply: ClassifyReply = self.post_with_retries(&url, &request).await?;
        validate_reply(reply)
    }

    /// Classify a batch of ambiguous documents in one remote call.
    /// The reply is order-preserving; a count mismatch is a contract error.
    pub async fn classify_batch(
        &self,
        docs: &[ClassifyInput],
    ) -> Result<Vec<Classification>, ClassifierError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let request = BatchClassifyRequest {
            documents: docs
                .iter()
                .map(|d| ClassifyRequest {
                    text: &d.text,
                    title: &d.title,
                    source: &d.source,
                    section: &d.section,
                })
                .collect(),
        };
        let url = format!("{}/classify/batch", self.base_url);

        let reply: BatchClassifyReply = self.post_with_retries(&url, &request).await?;
        if reply.results.len() != docs.len() {
            return Err(ClassifierError::ParseError(format!(
                "Batch reply count mismatch: sent {}, got {}",
                docs.len(),
                reply.results.len()
            )));
        }

        reply.results.into_iter().map(validate_reply).collect()
    }

    async fn post_with_retries<Req, Resp>(
        &self,
        url: &str,
        request: &Req,
    ) -> Result<Resp, ClassifierError>
    where
        Req: Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_millis(BACKOFF_BASE_MS * (1 << attempt));
                tracing::debug!("Classify retry {} after {:?}", attempt, backoff);
                tokio::time::sleep(backoff).await;
            }

            match self.post_once(url, request).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Classify attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                },
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| ClassifierError::ApiError("retries exhausted".to_string())))
    }

    async fn post_once<Req, Resp>(&self, url: &str, request: &Req) -> Result<Resp, ClassifierError>
    where
        Req: Serialize,
        Resp: serde::de::DeserializeOwned,
    {
        let response = self
            .http_client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout(self.timeout.as_secs())
                } else {
                    ClassifierError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ClassifierError::RateLimited(retry_after));
        }

        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Rejected { status: status.as_u16(), body });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClassifierError::ApiError(format!("API error {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| ClassifierError::ParseError(e.to_string()))
    }
}

/// Enforce the reply contract: known label, confidence within [0,1].
fn validate_reply(reply: ClassifyReply) -> Result<Classification, ClassifierError> {
    let label = RiskLabel::parse(&reply.label).ok_or_else(|| {
        ClassifierError::ParseError(format!("Unknown label in reply: {}", reply.label))
    })?;

    if !(0.0..=1.0).contains(&reply.confidence) {
        return Err(ClassifierError::ParseError(format!(
            "Confidence out of range: {}",
            reply.confidence
        )));
    }

    Ok(Classification::new(
        label,
        reply.confidence,
        ClassificationMethod::HybridLlm,
        reply.reason.unwrap_or_else(|| "LLM classification".to_string()),
    ))
}
