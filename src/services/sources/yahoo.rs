//! Financial-data adapter - share price and revenue risk indicators
//!
//! Resolving a Spanish company name to a ticker goes through four
//! strategies in order: curated lookup table, fuzzy match over the table,
//! optional LLM resolve, and finally the provider's own symbol search.
//! Resolutions are cached per process.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Client;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use super::SourceAdapter;
use crate::models::{SearchSummary, Source, SourceRecord, SourceResult};
use crate::services::generate::GenerateClient;
use crate::utils::SearchWindow;

/// Minimum normalized similarity for a fuzzy table match.
const FUZZY_THRESHOLD: f64 = 0.8;

/// Curated mapping of Spanish company names to ticker symbols.
/// Keys are lowercase; multiple aliases may map to one ticker.
const TICKER_TABLE: &[(&str, &str)] = &[
    // Banking & financial services
    ("santander", "SAN"),
    ("banco santander", "SAN"),
    ("bbva", "BBVA"),
    ("banco bilbao vizcaya", "BBVA"),
    ("caixabank", "CABK"),
    ("banco sabadell", "SAB"),
    ("sabadell", "SAB"),
    ("bankinter", "BKT"),
    ("mapfre", "MAP"),
    // Telecommunications
    ("telefonica", "TEF"),
    ("telefónica", "TEF"),
    ("movistar", "TEF"),
    ("cellnex", "CLNX"),
    // Energy & utilities
    ("iberdrola", "IBE"),
    ("endesa", "ELE"),
    ("naturgy", "NTGY"),
    ("red electrica", "REE"),
    ("red eléctrica", "REE"),
    ("enagas", "ENG"),
    ("acciona", "ANA"),
    ("repsol", "REP"),
    // Retail & consumer
    ("inditex", "ITX"),
    ("zara", "ITX"),
    ("dia", "DIA"),
    // Construction & infrastructure
    ("acs", "ACS"),
    ("ferrovial", "FER"),
    ("sacyr", "SCYR"),
    ("fcc", "FCC"),
    // Technology & media
    ("amadeus", "AMS"),
    ("indra", "IDR"),
    ("atresmedia", "A3M"),
    // Healthcare & pharma
    ("grifols", "GRF"),
    ("rovi", "ROVI"),
    ("almirall", "ALM"),
    // Travel & leisure
    ("aena", "AENA"),
    ("melia", "MEL"),
    ("meliá", "MEL"),
    ("iag", "IAG"),
    ("iberia", "IAG"),
];

#[derive(Debug, Clone)]
struct RiskIndicator {
    kind: &'static str,
    severity: &'static str,
    description: String,
    value: f64,
}

pub struct YahooFinanceAdapter {
    http_client: Client,
    base_url: String,
    ticker_cache: DashMap<String, String>,
    /// Optional LLM resolver used between the fuzzy match and the live search
    generate_client: Option<Arc<GenerateClient>>,
}

impl YahooFinanceAdapter {
    pub fn new(
        base_url: &str,
        timeout_secs: u64,
        generate_client: Option<Arc<GenerateClient>>,
    ) -> Self {
        let http_client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build finance HTTP client: {}. Using defaults.", e);
                Client::default()
            });

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            ticker_cache: DashMap::new(),
            generate_client,
        }
    }

    /// Lowercase, drop commas, strip a trailing legal-form suffix.
    fn normalize(name: &str) -> String {
        let lowered = name.trim().to_lowercase().replace(',', "");
        for suffix in [" s.a.", " s.l.", " sa", " sl"] {
            if let Some(stripped) = lowered.strip_suffix(suffix) {
                return stripped.trim_end().to_string();
            }
        }
        lowered
    }

    fn table_lookup(name: &str) -> Option<String> {
        let normalized = Self::normalize(name);
        TICKER_TABLE
            .iter()
            .find(|(key, _)| *key == normalized)
            .map(|(_, ticker)| ticker.to_string())
    }

    fn fuzzy_lookup(name: &str) -> Option<String> {
        let normalized = Self::normalize(name);
        let mut best: Option<(f64, &str)> = None;

        for (key, ticker) in TICKER_TABLE {
            let score = strsim::normalized_levenshtein(&normalized, key);
            if score >= FUZZY_THRESHOLD && best.map(|(b, _)| score > b).unwrap_or(true) {
                best = Some((score, ticker));
            }
        }

        best.map(|(score, ticker)| {
            tracing::debug!("Fuzzy matched '{}' to {} (score {:.2})", name, ticker, score);
            ticker.to_string()
        })
    }

    async fn llm_lookup(&self, name: &str) -> Option<String> {
        let client = self.generate_client.as_ref()?;
        let prompt = format!(
            "¿Cuál es el símbolo bursátil (ticker) de la empresa española \"{}\"? \
             Responde únicamente con el ticker, sin texto adicional. \
             Si no cotiza, responde NONE.",
            name
        );

        match client.generate(&prompt, 16, 0.0).await {
            Ok(reply) => {
                let candidate = reply.trim().to_uppercase();
                let valid = !candidate.is_empty()
                    && candidate != "NONE"
                    && candidate.len() <= 7
                    && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');
                if valid {
                    tracing::debug!("LLM resolved '{}' to {}", name, candidate);
                    Some(candidate)
                } else {
                    None
                }
            },
            Err(e) => {
                tracing::warn!("LLM ticker resolve failed for '{}': {}", name, e);
                None
            },
        }
    }

    async fn provider_lookup(&self, name: &str) -> Option<String> {
        let url = format!(
            "{}/v1/finance/search?q={}",
            self.base_url,
            urlencoding::encode(name)
        );

        let body: Value = self
            .http_client
            .get(&url)
            .send()
            .await
            .ok()?
            .json()
            .await
            .ok()?;

        let symbol = body
            .get("quotes")?
            .as_array()?
            .iter()
            .filter_map(|q| q.get("symbol").and_then(Value::as_str))
            // Major listings only; skip foreign suffixed symbols
            .find(|s| s.len() <= 5 && !s.contains('.'))?;

        tracing::debug!("Provider search resolved '{}' to {}", name, symbol);
        Some(symbol.to_string())
    }

    /// Resolution chain: table → fuzzy → LLM → provider search.
    async fn resolve_ticker(&self, name: &str) -> Option<String> {
        let cache_key = Self::normalize(name);
        if let Some(hit) = self.ticker_cache.get(&cache_key) {
            return Some(hit.clone());
        }

        let resolved = if let Some(ticker) = Self::table_lookup(name) {
            Some(ticker)
        } else if let Some(ticker) = Self::fuzzy_lookup(name) {
            Some(ticker)
        } else if let Some(ticker) = self.llm_lookup(name).await {
            Some(ticker)
        } else {
            self.provider_lookup(name).await
        };

        if let Some(ticker) = &resolved {
            self.ticker_cache.insert(cache_key, ticker.clone());
        }
        resolved
    }

    /// 7-day price history: (week_ago_close, latest_close, currency, latest_price).
    async fn fetch_price_history(&self, ticker: &str) -> Result<(f64, f64, String), String> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=7d&interval=1d",
            self.base_url,
            urlencoding::encode(ticker)
        );

        let body: Value = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("chart request failed: {}", e))?
            .json()
            .await
            .map_err(|e| format!("chart response malformed: {}", e))?;

        let result = body
            .pointer("/chart/result/0")
            .ok_or_else(|| "chart result missing".to_string())?;

        let closes: Vec<f64> = result
            .pointer("/indicators/quote/0/close")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        if closes.len() < 2 {
            return Err("not enough close prices in 7d history".to_string());
        }

        let currency = result
            .pointer("/meta/currency")
            .and_then(Value::as_str)
            .unwrap_or("EUR")
            .to_string();

        Ok((closes[0], closes[closes.len() - 1], currency))
    }

    /// Latest two annual revenue figures: (previous, latest).
    async fn fetch_revenue(&self, ticker: &str) -> Result<(f64, f64), String> {
        let url = format!(
            "{}/ws/fundamentals-timeseries/v1/finance/timeseries/{}?type=annualTotalRevenue",
            self.base_url,
            urlencoding::encode(ticker)
        );

        let body: Value = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("revenue request failed: {}", e))?
            .json()
            .await
            .map_err(|e| format!("revenue response malformed: {}", e))?;

        let revenues: Vec<f64> = body
            .pointer("/timeseries/result/0/annualTotalRevenue")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.pointer("/reportedValue/raw").and_then(Value::as_f64))
                    .collect()
            })
            .unwrap_or_default();

        if revenues.len() < 2 {
            return Err("fewer than two annual revenue figures".to_string());
        }

        // Figures arrive oldest-first
        Ok((revenues[revenues.len() - 2], revenues[revenues.len() - 1]))
    }
}

fn severity_points(severity: &str) -> u32 {
    match severity {
        "high" => 3,
        "medium" => 1,
        _ => 0,
    }
}

fn risk_level_for(score: u32) -> &'static str {
    if score >= 3 {
        "High"
    } else if score >= 1 {
        "Medium"
    } else {
        "Low"
    }
}

#[async_trait]
impl SourceAdapter for YahooFinanceAdapter {
    fn source(&self) -> Source {
        Source::YahooFinance
    }

    async fn search(&self, query: &str, _window: SearchWindow) -> SourceResult {
        let source_name = self.source().as_str();

        let Some(ticker) = self.resolve_ticker(query).await else {
            return SourceResult::failed(query, &source_name, "Company ticker symbol not found");
        };

        let mut errors = Vec::new();
        let mut indicators: Vec<RiskIndicator> = Vec::new();
        let mut extra = std::collections::HashMap::new();
        extra.insert("ticker".to_string(), Value::String(ticker.clone()));

        match self.fetch_price_history(&ticker).await {
            Ok((week_ago, latest, currency)) => {
                let drop_pct = (week_ago - latest) / week_ago * 100.0;
                extra.insert(
                    "price_change_7d".to_string(),
                    json!({ "from": week_ago, "to": latest, "percentage": drop_pct }),
                );
                extra.insert("current_price".to_string(), json!(latest));
                extra.insert("currency".to_string(), Value::String(currency));

                if drop_pct > 5.0 {
                    indicators.push(RiskIndicator {
                        kind: "share_price_drop",
                        severity: if drop_pct > 10.0 { "high" } else { "medium" },
                        description: format!(
                            "Significant share price drop: {:.2}% in 7 days",
                            drop_pct
                        ),
                        value: drop_pct,
                    });
                }
            },
            Err(e) => {
                tracing::warn!("Price history unavailable for {}: {}", ticker, e);
                errors.push(e);
            },
        }

        match self.fetch_revenue(&ticker).await {
            Ok((previous, latest)) => {
                let change_pct = (latest - previous) / previous * 100.0;
                extra.insert(
                    "revenue_change_yoy".to_string(),
                    json!({ "from": previous, "to": latest, "percentage": change_pct }),
                );

                if change_pct < -10.0 {
                    indicators.push(RiskIndicator {
                        kind: "revenue_decline",
                        severity: if change_pct < -20.0 { "high" } else { "medium" },
                        description: format!(
                            "Revenue decline year-over-year: {:.2}%",
                            change_pct
                        ),
                        value: change_pct,
                    });
                }
            },
            Err(e) => {
                tracing::warn!("Revenue data unavailable for {}: {}", ticker, e);
                errors.push(e);
            },
        }

        let risk_score: u32 = indicators.iter().map(|i| severity_points(i.severity)).sum();
        let risk_level = risk_level_for(risk_score);

        extra.insert(
            "risk_indicators".to_string(),
            Value::Array(
                indicators
                    .iter()
                    .map(|i| {
                        json!({
                            "type": i.kind,
                            "severity": i.severity,
                            "description": i.description,
                            "value": i.value,
                        })
                    })
                    .collect(),
            ),
        );
        extra.insert("risk_score".to_string(), json!(risk_score));
        extra.insert("risk_level".to_string(), Value::String(risk_level.to_string()));

        let text = if indicators.is_empty() {
            format!("Sin indicadores de riesgo financiero para {} ({})", query, ticker)
        } else {
            indicators
                .iter()
                .map(|i| i.description.clone())
                .collect::<Vec<_>>()
                .join(". ")
        };

        let record = SourceRecord {
            title: format!("Análisis financiero: {} ({})", query, ticker),
            text,
            url: format!("https://finance.yahoo.com/quote/{}", ticker),
            published_at: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            extra,
            ..Default::default()
        };

        tracing::info!(
            "Finance search '{}' ({}): {} risk indicators, level {}",
            query,
            ticker,
            indicators.len(),
            risk_level
        );

        SourceResult {
            summary: SearchSummary {
                query: query.to_string(),
                source: source_name,
                total_results: 1,
                feeds_searched: 1,
                errors,
            },
            records: vec![record],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_is_case_insensitive() {
        assert_eq!(YahooFinanceAdapter::table_lookup("Banco Santander").as_deref(), Some("SAN"));
        assert_eq!(YahooFinanceAdapter::table_lookup("TELEFÓNICA").as_deref(), Some("TEF"));
        assert_eq!(YahooFinanceAdapter::table_lookup("Desconocida SL"), None);
    }

    #[test]
    fn fuzzy_lookup_tolerates_typos() {
        assert_eq!(YahooFinanceAdapter::fuzzy_lookup("iberdrola").as_deref(), Some("IBE"));
        assert_eq!(YahooFinanceAdapter::fuzzy_lookup("iberdrol").as_deref(), Some("IBE"));
        // Far from anything in the table
        assert_eq!(YahooFinanceAdapter::fuzzy_lookup("xyz corporation intl"), None);
    }

    #[test]
    fn severity_scoring() {
        assert_eq!(severity_points("high"), 3);
        assert_eq!(severity_points("medium"), 1);
        assert_eq!(risk_level_for(0), "Low");
        assert_eq!(risk_level_for(1), "Medium");
        assert_eq!(risk_level_for(3), "High");
        assert_eq!(risk_level_for(4), "High");
    }
}
