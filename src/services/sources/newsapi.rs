//! NewsAPI adapter - global news provider
//!
//! Single windowed query against `/everything`. The provider rejects
//! windows deeper than 30 days on the standard plan; instead of failing
//! the request, the adapter clamps the window and surfaces a note in
//! `summary.errors`.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::SourceAdapter;
use crate::models::{SearchSummary, Source, SourceRecord, SourceResult};
use crate::utils::SearchWindow;

const MAX_WINDOW_DAYS: i64 = 30;
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsApiArticle {
    #[serde(default)]
    source: NewsApiSourceName,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(rename = "publishedAt", default)]
    published_at: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct NewsApiSourceName {
    #[serde(default)]
    name: String,
}

pub struct NewsApiAdapter {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl NewsApiAdapter {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Self {
        let http_client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build NewsAPI HTTP client: {}. Using defaults.", e);
                Client::default()
            });

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Clamp the window to the provider limit. Returns the effective window
    /// and a caller-visible note when clamping occurred.
    fn clamp_window(window: SearchWindow) -> (SearchWindow, Option<String>) {
        if window.days() <= MAX_WINDOW_DAYS {
            return (window, None);
        }

        let clamped = SearchWindow {
            start: window.end - ChronoDuration::days(MAX_WINDOW_DAYS - 1),
            end: window.end,
        };
        let note = format!(
            "Requested window of {} days exceeds the provider limit of {}; clamped to {}..{}",
            window.days(),
            MAX_WINDOW_DAYS,
            clamped.start,
            clamped.end
        );
        (clamped, Some(note))
    }
}

#[async_trait]
impl SourceAdapter for NewsApiAdapter {
    fn source(&self) -> Source {
        Source::NewsApi
    }

    async fn search(&self, query: &str, window: SearchWindow) -> SourceResult {
        let source_name = self.source().as_str();
        let (window, clamp_note) = Self::clamp_window(window);
        let mut errors = Vec::new();
        if let Some(note) = clamp_note {
            tracing::warn!("NewsAPI: {}", note);
            errors.push(note);
        }

        let url = format!(
            "{}/everything?q={}&from={}&to={}&language=es&sortBy=publishedAt&pageSize={}&apiKey={}",
            self.base_url,
            urlencoding::encode(query),
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d"),
            PAGE_SIZE,
            self.api_key,
        );

        let response = match self.http_client.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!("NewsAPI request failed: {}", e);
                errors.push(format!("Request failed: {}", e));
                return SourceResult {
                    summary: SearchSummary {
                        query: query.to_string(),
                        source: source_name,
                        total_results: 0,
                        feeds_searched: 0,
                        errors,
                    },
                    records: Vec::new(),
                };
            },
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("NewsAPI HTTP {}: {}", status, body);
            errors.push(format!("HTTP {}: {}", status, body));
            return SourceResult {
                summary: SearchSummary {
                    query: query.to_string(),
                    source: source_name,
                    total_results: 0,
                    feeds_searched: 1,
                    errors,
                },
                records: Vec::new(),
            };
        }

        let parsed: NewsApiResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                errors.push(format!("Malformed response: {}", e));
                return SourceResult {
                    summary: SearchSummary {
                        query: query.to_string(),
                        source: source_name,
                        total_results: 0,
                        feeds_searched: 1,
                        errors,
                    },
                    records: Vec::new(),
                };
            },
        };

        if parsed.status != "ok" {
            let msg = parsed.message.unwrap_or_else(|| "unknown provider error".to_string());
            errors.push(format!("Provider error: {}", msg));
        }

        let records: Vec<SourceRecord> = parsed
            .articles
            .into_iter()
            .map(|article| {
                let text = article
                    .content
                    .or(article.description)
                    .unwrap_or_default();
                let mut record = SourceRecord {
                    title: article.title,
                    text,
                    url: article.url,
                    published_at: article.published_at,
                    ..Default::default()
                };
                if let Some(author) = article.author {
                    record
                        .extra
                        .insert("author".to_string(), serde_json::Value::String(author));
                }
                if !article.source.name.is_empty() {
                    record.extra.insert(
                        "source_name".to_string(),
                        serde_json::Value::String(article.source.name),
                    );
                }
                record
            })
            .collect();

        tracing::info!("NewsAPI search '{}': {} articles", query, records.len());

        SourceResult {
            summary: SearchSummary {
                query: query.to_string(),
                source: source_name,
                total_results: records.len(),
                feeds_searched: 1,
                errors,
            },
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn short_window_is_untouched() {
        let window = SearchWindow { start: d("2024-05-01"), end: d("2024-05-07") };
        let (clamped, note) = NewsApiAdapter::clamp_window(window);
        assert_eq!(clamped, window);
        assert!(note.is_none());
    }

    #[test]
    fn deep_window_is_clamped_with_note() {
        let window = SearchWindow { start: d("2024-01-01"), end: d("2024-05-01") };
        let (clamped, note) = NewsApiAdapter::clamp_window(window);
        assert_eq!(clamped.days(), 30);
        assert_eq!(clamped.end, d("2024-05-01"));
        let note = note.unwrap();
        assert!(note.contains("clamped"));
    }
}
