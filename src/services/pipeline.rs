//! End-to-end search pipeline
//!
//! Coordinates one user-initiated search: cache consultation, concurrent
//! source fan-out, classification, asynchronous persistence, optional
//! embedding, and the response envelope. Owns RawDoc/Event mutation during
//! ingest; warehouse writes go through the write queue and are never
//! awaited on the request path.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{EmbeddingConfig, SourcesConfig};
use crate::models::{
    CacheInfo, DatabaseStats, DateRange, Event, PerformanceInfo, RawDoc, RiskColor,
    SearchMetadata, SearchRequest, SearchResponse, SearchResultItem, Source, SourceRecord,
};
use crate::services::cache::CacheTier;
use crate::services::classifier::HybridClassifier;
use crate::services::embedder::EmbedClient;
use crate::services::orchestrator::SearchOrchestrator;
use crate::services::vector_store::{VectorMetadata, VectorStore};
use crate::services::warehouse::{WarehouseClient, WriteOperation, WriteQueue, tables};
use crate::utils::{
    ScheduledTask, SearchWindow, canonical_json, fingerprint, format_pub_date,
    parse_flexible_date,
};

pub struct Pipeline {
    orchestrator: Arc<SearchOrchestrator>,
    classifier: Arc<HybridClassifier>,
    cache: Arc<CacheTier>,
    write_queue: Arc<WriteQueue>,
    vector_store: Arc<VectorStore>,
    embedder: Arc<EmbedClient>,
    embedding: EmbeddingConfig,
    default_days_back: i64,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: Arc<SearchOrchestrator>,
        classifier: Arc<HybridClassifier>,
        cache: Arc<CacheTier>,
        write_queue: Arc<WriteQueue>,
        vector_store: Arc<VectorStore>,
        embedder: Arc<EmbedClient>,
        embedding: EmbeddingConfig,
        sources: &SourcesConfig,
    ) -> Self {
        Self {
            orchestrator,
            classifier,
            cache,
            write_queue,
            vector_store,
            embedder,
            embedding,
            default_days_back: sources.default_days_back,
        }
    }

    pub fn classifier(&self) -> &HybridClassifier {
        &self.classifier
    }

    /// Serve one search request, from cache when possible.
    pub async fn search(&self, request: &SearchRequest) -> SearchResponse {
        let started = Instant::now();
        let window = SearchWindow::resolve(
            request.start_date,
            request.end_date,
            Some(request.days_back),
            self.default_days_back,
        );
        let active_sources = self.active_sources(request);
        let cache_key = CacheTier::derive_key(
            &request.company_name,
            window,
            Some(request.days_back),
            &active_sources,
        );

        if !request.force_refresh
            && let Some(cached) = self
                .cache
                .get(&cache_key, &request.company_name, window, request.cache_age_hours)
                .await
            && let Some(response) =
                self.envelope_from_cache(request, window, &cached, started)
        {
            return response;
        }

        self.fresh_search(request, window, &active_sources, &cache_key, started)
            .await
    }

    fn active_sources(&self, request: &SearchRequest) -> Vec<Source> {
        let available = self.orchestrator.available_sources();
        available
            .into_iter()
            .filter(|source| match source {
                Source::Boe => request.include_boe,
                Source::NewsApi => request.include_news,
                Source::Rss(_) => request.include_rss,
                Source::YahooFinance => request.include_finance,
            })
            .collect()
    }

    // ========================================
    // Cached path
    // ========================================

    fn envelope_from_cache(
        &self,
        request: &SearchRequest,
        window: SearchWindow,
        cached: &Value,
        started: Instant,
    ) -> Option<SearchResponse> {
        let raw_items = cached.get("results")?.as_array()?;
        let items: Vec<SearchResultItem> = raw_items
            .iter()
            .filter_map(|item| match serde_json::from_value(item.clone()) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::debug!("Skipping unreadable cached item: {}", e);
                    None
                },
            })
            .collect();

        if items.is_empty() {
            return None;
        }

        let sources: Vec<String> = cached
            .get("sources")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        tracing::info!(
            "Serving '{}' from cache: {} results",
            request.company_name,
            items.len()
        );

        Some(self.build_envelope(
            request,
            window,
            items,
            SearchMetadata {
                total_results: raw_items.len(),
                high_risk_results: 0,
                sources_searched: sources.clone(),
                source_errors: HashMap::new(),
            },
            CacheInfo {
                search_method: "cached".to_string(),
                age_hours: request.cache_age_hours,
                total_events: raw_items.len(),
                sources,
            },
            DatabaseStats::default(),
            started,
        ))
    }

    // ========================================
    // Fresh path
    // ========================================

    async fn fresh_search(
        &self,
        request: &SearchRequest,
        window: SearchWindow,
        active_sources: &[Source],
        cache_key: &str,
        started: Instant,
    ) -> SearchResponse {
        let results = self
            .orchestrator
            .search_all(&request.company_name, window, active_sources)
            .await;

        let mut raw_doc_rows: Vec<Value> = Vec::new();
        let mut events: Vec<Event> = Vec::new();
        let mut seen_raw_ids: HashSet<String> = HashSet::new();
        let mut duplicates_skipped = 0usize;
        let mut source_errors: HashMap<String, Vec<String>> = HashMap::new();

        for result in results.values() {
            if !result.summary.errors.is_empty() {
                source_errors
                    .insert(result.summary.source.clone(), result.summary.errors.clone());
            }

            let Ok(source) = result.summary.source.parse::<Source>() else {
                tracing::warn!("Unknown source in results: {}", result.summary.source);
                continue;
            };

            for record in &result.records {
                let payload = canonical_json(
                    &serde_json::to_value(record).unwrap_or(Value::Null),
                );
                let raw_id = fingerprint(&payload);

                // Dedup by content hash: one RawDoc per distinct payload
                if !seen_raw_ids.insert(raw_id.clone()) {
                    duplicates_skipped += 1;
                    continue;
                }

                let mut raw_doc = build_raw_doc(&raw_id, source, payload, record, request);

                if record.title.is_empty() && record.text.is_empty() {
                    // Nothing to normalize: transient parse failure path
                    raw_doc.mark_error();
                    raw_doc_rows.push(raw_doc_row(&raw_doc));
                    continue;
                }

                let classification = self
                    .classifier
                    .classify_document(
                        &record.text,
                        &record.title,
                        &result.summary.source,
                        record.section.as_deref().unwrap_or(""),
                    )
                    .await;

                let mut event = build_event(&raw_id, source, record, request);
                event.apply_classification(
                    classification.label,
                    classification.confidence,
                    classification.method,
                    classification.rationale,
                );

                raw_doc.mark_parsed();
                raw_doc_rows.push(raw_doc_row(&raw_doc));
                events.push(event);
            }
        }

        let vectors_stored = if self.embedding.enabled {
            self.embed_events(&mut events, &request.company_name).await
        } else {
            0
        };

        let raw_docs_queued = raw_doc_rows.len();
        let events_queued = events.len();
        if !raw_doc_rows.is_empty() {
            self.write_queue
                .enqueue(tables::RAW_DOCS, raw_doc_rows, WriteOperation::Insert, 3);
        }
        if !events.is_empty() {
            let event_rows: Vec<Value> = events
                .iter()
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect();
            self.write_queue
                .enqueue(tables::EVENTS, event_rows, WriteOperation::Insert, 2);
        }

        // Financial snapshots ride their own table, upserted per company
        let metric_rows: Vec<Value> = results
            .values()
            .filter(|r| r.summary.source == Source::YahooFinance.as_str())
            .flat_map(|r| r.records.iter())
            .filter_map(|record| financial_metrics_row(&request.company_name, record))
            .collect();
        if !metric_rows.is_empty() {
            self.write_queue.enqueue(
                tables::FINANCIAL_METRICS,
                metric_rows,
                WriteOperation::Upsert,
                3,
            );
        }

        let mut items: Vec<SearchResultItem> = events.iter().map(event_to_item).collect();
        items.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));

        let high_risk = items.iter().filter(|i| i.risk_level.is_high()).count();
        let metadata = SearchMetadata {
            total_results: items.len(),
            high_risk_results: high_risk,
            sources_searched: active_sources.iter().map(|s| s.as_str()).collect(),
            source_errors,
        };

        let cache_value = json!({
            "results": items,
            "total_events": items.len(),
            "sources": metadata.sources_searched,
        });
        self.cache.put(cache_key, &cache_value).await;

        // Searchable record of what was cached and with which parameters
        let cache_row = json!({
            "cache_key": cache_key,
            "company_name": request.company_name,
            "params_json": serde_json::to_string(&json!({
                "start": window.start,
                "end": window.end,
                "days_back": request.days_back,
                "sources": metadata.sources_searched,
            }))
            .unwrap_or_default(),
            "cached_at": Utc::now().to_rfc3339(),
        });
        self.write_queue
            .enqueue(tables::SEARCH_CACHE, vec![cache_row], WriteOperation::Upsert, 3);

        self.build_envelope(
            request,
            window,
            items,
            metadata,
            CacheInfo {
                search_method: "fresh".to_string(),
                age_hours: 0,
                total_events: events_queued,
                sources: active_sources.iter().map(|s| s.as_str()).collect(),
            },
            DatabaseStats {
                raw_docs_queued,
                events_queued,
                duplicates_skipped,
                vectors_stored,
            },
            started,
        )
    }

    /// Embed the high-signal subset of fresh events and store their vectors.
    /// Returns the number of vectors written.
    async fn embed_events(&self, events: &mut [Event], company_name: &str) -> usize {
        let gate = self.classifier.gate();
        let candidates: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, event)| {
                let risky = event
                    .risk_label
                    .map(|l| l.is_high() || l.is_medium())
                    .unwrap_or(false);
                risky || gate.has_legal_indicator(&event.text)
            })
            .map(|(i, _)| i)
            .take(self.embedding.max_documents_to_embed)
            .collect();

        let mut stored = 0usize;
        for index in candidates {
            let event = &mut events[index];
            let document = if event.text.is_empty() { &event.title } else { &event.text };

            let vector = match self.embedder.embed(document).await {
                Ok(vector) => vector,
                Err(e) => {
                    tracing::warn!("Embedding failed for {}: {}", event.event_id, e);
                    continue;
                },
            };

            let metadata = VectorMetadata {
                company_name: Some(company_name.to_string()),
                risk_level: event.risk_label.map(|l| l.as_str().to_string()),
                publication_date: event.pub_date.map(format_pub_date),
                source: Some(event.source.as_str()),
                title: Some(event.title.clone()),
                text_summary: Some(event.text.chars().take(1000).collect()),
                embedding_model: self.embedder.model().to_string(),
            };

            match self
                .vector_store
                .add(&event.event_id, &vector, &metadata, document)
                .await
            {
                Ok(()) => {
                    event.embedding_status = Some(crate::models::EmbeddingStatus::Vectorised);
                    event.embedding_model = Some(self.embedder.model().to_string());
                    stored += 1;
                },
                Err(e) => {
                    tracing::warn!("Vector store add failed for {}: {}", event.event_id, e);
                },
            }
        }

        stored
    }

    #[allow(clippy::too_many_arguments)]
    fn build_envelope(
        &self,
        request: &SearchRequest,
        window: SearchWindow,
        items: Vec<SearchResultItem>,
        mut metadata: SearchMetadata,
        cache_info: CacheInfo,
        database_stats: DatabaseStats,
        started: Instant,
    ) -> SearchResponse {
        metadata.high_risk_results =
            items.iter().filter(|i| i.risk_level.is_high()).count();

        let overall_risk = overall_color(&items);
        let risk_summary = format!(
            "{} resultados para {}; {} de alto riesgo",
            items.len(),
            request.company_name,
            metadata.high_risk_results
        );

        let stats = self.classifier.stats();

        SearchResponse {
            company_name: request.company_name.clone(),
            search_date: Utc::now().to_rfc3339(),
            date_range: DateRange { start: window.start, end: window.end },
            results: items,
            metadata,
            performance: PerformanceInfo {
                total_time_seconds: started.elapsed().as_secs_f64(),
                keyword_efficiency: stats.keyword_efficiency,
                llm_calls: stats.llm_calls,
            },
            cache_info,
            database_stats,
            overall_risk,
            risk_summary,
        }
    }
}

fn build_raw_doc(
    raw_id: &str,
    source: Source,
    payload: Vec<u8>,
    record: &SourceRecord,
    request: &SearchRequest,
) -> RawDoc {
    let mut meta = HashMap::new();
    meta.insert("company".to_string(), request.company_name.clone());
    meta.insert("url".to_string(), record.url.clone());
    meta.insert("pub_date".to_string(), record.published_at.clone());
    if let Some(section) = &record.section {
        meta.insert("section".to_string(), section.clone());
    }
    if let Some(identificador) = &record.identificador {
        meta.insert("identificador".to_string(), identificador.clone());
    }

    RawDoc {
        raw_id: raw_id.to_string(),
        source,
        payload,
        meta,
        fetched_at: Utc::now(),
        retries: 0,
        status: None,
    }
}

/// Warehouse row for a raw doc; payload travels base64-encoded.
fn raw_doc_row(doc: &RawDoc) -> Value {
    json!({
        "raw_id": doc.raw_id,
        "source": doc.source.as_str(),
        "payload": BASE64.encode(&doc.payload),
        "meta": serde_json::to_string(&doc.meta).unwrap_or_default(),
        "fetched_at": doc.fetched_at.to_rfc3339(),
        "retries": doc.retries,
        "status": doc.status,
    })
}

/// Row for the financial_metrics table from a finance-source record.
/// Returns None when the record carries no ticker (resolution failed).
fn financial_metrics_row(company_name: &str, record: &SourceRecord) -> Option<Value> {
    let ticker = record.extra.get("ticker")?.as_str()?;
    let pct = |key: &str| {
        record
            .extra
            .get(key)
            .and_then(|v| v.get("percentage"))
            .and_then(Value::as_f64)
    };

    Some(json!({
        "company_name": company_name,
        "ticker": ticker,
        "current_price": record.extra.get("current_price").cloned().unwrap_or(Value::Null),
        "price_change_7d_pct": pct("price_change_7d"),
        "revenue_change_yoy_pct": pct("revenue_change_yoy"),
        "risk_score": record.extra.get("risk_score").cloned().unwrap_or(Value::Null),
        "risk_level": record.extra.get("risk_level").cloned().unwrap_or(Value::Null),
        "fetched_at": Utc::now().to_rfc3339(),
    }))
}

fn build_event(
    raw_id: &str,
    source: Source,
    record: &SourceRecord,
    request: &SearchRequest,
) -> Event {
    let (pub_date, date_parse_error) = match parse_flexible_date(&record.published_at) {
        Some(date) => (Some(date), record.date_parse_error),
        None => (None, true),
    };

    Event {
        event_id: Event::event_id_for(source, raw_id),
        title: record.title.clone(),
        text: record.text.clone(),
        section: record.section.clone(),
        url: record.url.clone(),
        pub_date,
        date_parse_error,
        source,
        company_name: request.company_name.clone(),
        risk_label: None,
        confidence: None,
        rationale: None,
        classification_method: None,
        classifier_ts: None,
        embedding_status: None,
        embedding_model: None,
        alerted: false,
        created_at: Utc::now(),
    }
}

fn event_to_item(event: &Event) -> SearchResultItem {
    SearchResultItem {
        event_id: event.event_id.clone(),
        source: event.source.as_str(),
        title: event.title.clone(),
        summary: event.text.chars().take(200).collect(),
        url: event.url.clone(),
        pub_date: event.pub_date,
        section: event.section.clone(),
        risk_level: event.risk_label.unwrap_or(crate::models::RiskLabel::Unknown),
        confidence: event.confidence.unwrap_or(0.0),
        method: event
            .classification_method
            .unwrap_or(crate::models::ClassificationMethod::ErrorFallback),
        rationale: event.rationale.clone(),
        risk_color: event.risk_color(),
        date_parse_error: event.date_parse_error,
    }
}

/// Worst color wins; an empty result set is gray.
fn overall_color(items: &[SearchResultItem]) -> RiskColor {
    if items.is_empty() {
        return RiskColor::Gray;
    }
    if items.iter().any(|i| i.risk_color == RiskColor::Red) {
        RiskColor::Red
    } else if items.iter().any(|i| i.risk_color == RiskColor::Orange) {
        RiskColor::Orange
    } else {
        RiskColor::Green
    }
}

// ============================================================================
// Retention vacuum
// ============================================================================

/// Deletes parsed raw docs older than the retention window. Runs on the
/// scheduled executor alongside the write-queue worker.
pub struct RetentionVacuum {
    warehouse: Arc<WarehouseClient>,
    retention_days: i64,
}

impl RetentionVacuum {
    pub fn new(warehouse: Arc<WarehouseClient>, retention_days: i64) -> Self {
        Self { warehouse, retention_days }
    }
}

impl ScheduledTask for RetentionVacuum {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let cutoff =
                (Utc::now() - chrono::Duration::days(self.retention_days)).to_rfc3339();
            let sql = format!(
                "DELETE FROM `{}` WHERE status = 'parsed' AND fetched_at < '{}'",
                self.warehouse.qualified(tables::RAW_DOCS),
                cutoff,
            );
            self.warehouse.query(&sql).await?;
            tracing::debug!("Retention vacuum completed (cutoff {})", cutoff);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassificationMethod, RiskLabel};

    fn item(label: RiskLabel, pub_date: Option<&str>) -> SearchResultItem {
        SearchResultItem {
            event_id: "BOE:x".to_string(),
            source: "BOE".to_string(),
            title: "t".to_string(),
            summary: String::new(),
            url: String::new(),
            pub_date: pub_date.map(|d| d.parse().unwrap()),
            section: None,
            risk_level: label,
            confidence: 0.9,
            method: ClassificationMethod::KeywordHighLegal,
            rationale: None,
            risk_color: label.color(),
            date_parse_error: false,
        }
    }

    #[test]
    fn overall_color_takes_worst() {
        assert_eq!(overall_color(&[]), RiskColor::Gray);
        assert_eq!(
            overall_color(&[item(RiskLabel::NoLegal, None), item(RiskLabel::MediumLegal, None)]),
            RiskColor::Orange
        );
        assert_eq!(
            overall_color(&[item(RiskLabel::NoLegal, None), item(RiskLabel::HighLegal, None)]),
            RiskColor::Red
        );
        assert_eq!(overall_color(&[item(RiskLabel::LowLegal, None)]), RiskColor::Green);
    }

    #[test]
    fn raw_doc_row_encodes_payload() {
        let record = SourceRecord { title: "t".to_string(), ..Default::default() };
        let request = SearchRequest {
            company_name: "Empresa".to_string(),
            start_date: None,
            end_date: None,
            days_back: 7,
            include_boe: true,
            include_news: true,
            include_rss: true,
            include_finance: false,
            force_refresh: false,
            cache_age_hours: 24,
        };
        let payload = canonical_json(&serde_json::to_value(&record).unwrap());
        let raw_id = fingerprint(&payload);
        let doc = build_raw_doc(&raw_id, Source::Boe, payload.clone(), &record, &request);
        let row = raw_doc_row(&doc);

        assert_eq!(row["raw_id"].as_str().unwrap(), raw_id);
        assert_eq!(row["source"], json!("BOE"));
        let decoded = BASE64.decode(row["payload"].as_str().unwrap()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(row["status"], Value::Null);
    }

    #[test]
    fn event_id_prefix_matches_source() {
        let record = SourceRecord {
            title: "t".to_string(),
            published_at: "2024-05-01".to_string(),
            ..Default::default()
        };
        let request = SearchRequest {
            company_name: "Empresa".to_string(),
            start_date: None,
            end_date: None,
            days_back: 7,
            include_boe: true,
            include_news: true,
            include_rss: true,
            include_finance: false,
            force_refresh: false,
            cache_age_hours: 24,
        };
        let event = build_event("deadbeef", Source::NewsApi, &record, &request);
        assert!(event.event_id.starts_with("NewsAPI:"));
        assert_eq!(event.pub_date.unwrap().to_string(), "2024-05-01");
        assert!(!event.date_parse_error);

        let bad = SourceRecord {
            title: "t".to_string(),
            published_at: "ayer por la tarde".to_string(),
            ..Default::default()
        };
        let event = build_event("deadbeef", Source::NewsApi, &bad, &request);
        assert!(event.pub_date.is_none());
        assert!(event.date_parse_error);
    }
}
