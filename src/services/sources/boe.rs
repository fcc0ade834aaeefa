//! BOE adapter - Boletín Oficial del Estado daily summaries
//!
//! The gazette's open-data API serves one summary document per publication
//! day, so the adapter expands the window into one fetch per day. Missing
//! days (404 or empty body) are normal: the BOE does not publish every day.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{SourceAdapter, matches_query};
use crate::models::{SearchSummary, Source, SourceRecord, SourceResult};
use crate::utils::SearchWindow;

pub struct BoeAdapter {
    http_client: Client,
    base_url: String,
}

impl BoeAdapter {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let http_client = Client::builder()
            .pool_max_idle_per_host(16)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build BOE HTTP client: {}. Using defaults.", e);
                Client::default()
            });

        Self { http_client, base_url: base_url.trim_end_matches('/').to_string() }
    }

    fn summary_url(&self, day: NaiveDate) -> String {
        format!("{}/datosabiertos/api/boe/sumario/{}", self.base_url, day.format("%Y%m%d"))
    }

    fn item_url(&self, identificador: &str) -> String {
        format!("{}/diario_boe/txt.php?id={}", self.base_url, urlencoding::encode(identificador))
    }

    /// Fetch one day's summary; Ok(None) for a day without a gazette.
    async fn fetch_day(&self, day: NaiveDate) -> Result<Option<Value>, String> {
        let url = self.summary_url(day);
        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| format!("{}: {}", day, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(format!("{}: HTTP {}", day, response.status()));
        }

        let body: Value = response.json().await.map_err(|e| format!("{}: {}", day, e))?;
        Ok(Some(body))
    }

    /// Walk a day's summary tree collecting publishable items.
    ///
    /// The summary nests items under diario → sección → departamento →
    /// epígrafe with per-deployment variations; rather than chase each
    /// shape, the walk keeps the nearest section context and collects any
    /// object carrying both `identificador` and `titulo`.
    fn collect_items(&self, day: NaiveDate, value: &Value, records: &mut Vec<SourceRecord>) {
        let mut stack: Vec<(&Value, Option<(String, String)>)> = vec![(value, None)];

        while let Some((node, section)) = stack.pop() {
            match node {
                Value::Object(map) => {
                    let section = match (map.get("codigo"), map.get("nombre")) {
                        (Some(Value::String(codigo)), Some(Value::String(nombre))) => {
                            Some((codigo.clone(), nombre.clone()))
                        },
                        _ => section,
                    };

                    if let (Some(Value::String(identificador)), Some(Value::String(titulo))) =
                        (map.get("identificador"), map.get("titulo"))
                    {
                        let url = map
                            .get("url_html")
                            .and_then(Value::as_str)
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| self.item_url(identificador));
                        let text = map
                            .get("texto")
                            .and_then(Value::as_str)
                            .unwrap_or(titulo)
                            .to_string();

                        records.push(SourceRecord {
                            title: titulo.clone(),
                            text,
                            url,
                            published_at: day.format("%Y-%m-%d").to_string(),
                            section: section.as_ref().map(|(codigo, _)| codigo.clone()),
                            section_name: section.as_ref().map(|(_, nombre)| nombre.clone()),
                            identificador: Some(identificador.clone()),
                            ..Default::default()
                        });
                        continue;
                    }

                    for child in map.values() {
                        stack.push((child, section.clone()));
                    }
                },
                Value::Array(items) => {
                    for child in items {
                        stack.push((child, section.clone()));
                    }
                },
                _ => {},
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for BoeAdapter {
    fn source(&self) -> Source {
        Source::Boe
    }

    async fn search(&self, query: &str, window: SearchWindow) -> SourceResult {
        let mut records = Vec::new();
        let mut errors = Vec::new();
        let mut days_fetched = 0usize;

        for day in window.iter_days() {
            match self.fetch_day(day).await {
                Ok(Some(summary)) => {
                    days_fetched += 1;
                    self.collect_items(day, &summary, &mut records);
                },
                Ok(None) => {
                    tracing::debug!("BOE: no gazette for {}", day);
                },
                Err(e) => {
                    tracing::warn!("BOE day fetch failed: {}", e);
                    errors.push(e);
                },
            }
        }

        records.retain(|r| matches_query(query, &[&r.title, &r.text]));

        tracing::info!(
            "BOE search '{}': {} items over {} gazette days ({} errors)",
            query,
            records.len(),
            days_fetched,
            errors.len()
        );

        SourceResult {
            summary: SearchSummary {
                query: query.to_string(),
                source: self.source().as_str(),
                total_results: records.len(),
                feeds_searched: days_fetched,
                errors,
            },
            records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> BoeAdapter {
        BoeAdapter::new("https://www.boe.es", 10)
    }

    #[test]
    fn collects_items_with_section_context() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let summary = json!({
            "data": {
                "sumario": {
                    "diario": [{
                        "seccion": [{
                            "codigo": "JUS",
                            "nombre": "Administración de Justicia",
                            "departamento": [{
                                "item": [{
                                    "identificador": "BOE-A-2024-1234",
                                    "titulo": "Resolución sobre concurso de acreedores",
                                    "url_html": "https://www.boe.es/diario_boe/txt.php?id=BOE-A-2024-1234"
                                }]
                            }]
                        }]
                    }]
                }
            }
        });

        let mut records = Vec::new();
        adapter().collect_items(day, &summary, &mut records);

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.identificador.as_deref(), Some("BOE-A-2024-1234"));
        assert_eq!(record.section.as_deref(), Some("JUS"));
        assert_eq!(record.section_name.as_deref(), Some("Administración de Justicia"));
        assert_eq!(record.published_at, "2024-05-02");
    }

    #[test]
    fn builds_item_url_when_missing() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let summary = json!({
            "item": [{"identificador": "BOE-A-2024-99", "titulo": "Anuncio"}]
        });

        let mut records = Vec::new();
        adapter().collect_items(day, &summary, &mut records);
        assert_eq!(records.len(), 1);
        assert!(records[0].url.contains("BOE-A-2024-99"));
    }

    #[test]
    fn summary_url_uses_compact_date() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert!(adapter().summary_url(day).ends_with("/sumario/20240502"));
    }
}
