//! End-to-end pipeline scenarios over canned source adapters

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::common::{FixedAdapter, boe_record, build_pipeline, news_record, search_request};
use crate::models::{ClassificationMethod, RiskColor, RiskLabel, Source};
use crate::services::sources::SourceAdapter;

const OFFLINE: &str = "http://127.0.0.1:1";

/// BOE high-legal fast path through the whole pipeline: red result item
/// with risk_color present and writes queued.
#[tokio::test]
async fn boe_result_classifies_red_and_queues_writes() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(FixedAdapter {
        source: Source::Boe,
        records: vec![boe_record(
            "BOE-A-2024-1234",
            "Auto de declaración de concurso",
            "Se declara el concurso de acreedores de Empresa Concurso SA",
            "JUS",
        )],
        error: None,
    })];

    let fixture = build_pipeline(adapters, OFFLINE, OFFLINE, None).await;
    let response = fixture.pipeline.search(&search_request("Empresa Concurso")).await;

    assert_eq!(response.results.len(), 1);
    let item = &response.results[0];
    assert_eq!(item.risk_level, RiskLabel::HighLegal);
    assert!(item.confidence >= 0.92);
    assert!(matches!(
        item.method,
        ClassificationMethod::KeywordSection | ClassificationMethod::KeywordHighLegal
    ));
    assert_eq!(item.risk_color, RiskColor::Red);
    assert!(item.event_id.starts_with("BOE:"));

    assert_eq!(response.overall_risk, RiskColor::Red);
    assert_eq!(response.cache_info.search_method, "fresh");
    assert_eq!(response.database_stats.raw_docs_queued, 1);
    assert_eq!(response.database_stats.events_queued, 1);

    // raw_docs (prio 3), events (prio 2) and the cache record sit queued
    let status = fixture.write_queue.status();
    assert_eq!(status.pending, 3);
    assert_eq!(status.by_table["raw_docs"], 1);
    assert_eq!(status.by_table["events"], 1);
    assert_eq!(status.by_table["search_cache"], 1);
    assert_eq!(status.by_priority[&2], 1);
    assert_eq!(status.by_priority[&3], 2);
}

/// Submitting the same payload twice creates exactly one RawDoc.
#[tokio::test]
async fn duplicate_payloads_are_deduplicated() {
    let record = news_record("Club gana la liga de fútbol", "final triunfal");
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(FixedAdapter {
        source: Source::NewsApi,
        records: vec![record.clone(), record],
        error: None,
    })];

    let fixture = build_pipeline(adapters, OFFLINE, OFFLINE, None).await;
    let response = fixture.pipeline.search(&search_request("Club")).await;

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.database_stats.raw_docs_queued, 1);
    assert_eq!(response.database_stats.duplicates_skipped, 1);
    assert_eq!(response.results[0].risk_level, RiskLabel::NoLegal);
    assert_eq!(response.results[0].risk_color, RiskColor::Green);
}

/// Source isolation: a failing news backend leaves the BOE block fully
/// populated and the overall call succeeding.
#[tokio::test]
async fn failing_source_does_not_poison_the_search() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(FixedAdapter {
            source: Source::Boe,
            records: vec![boe_record(
                "BOE-A-2024-77",
                "Resolución sancionadora",
                "Sanción grave impuesta a la entidad por el supervisor",
                "CNMV",
            )],
            error: None,
        }),
        Arc::new(FixedAdapter {
            source: Source::NewsApi,
            records: vec![],
            error: Some("Request failed: invalid URL".to_string()),
        }),
    ];

    let fixture = build_pipeline(adapters, OFFLINE, OFFLINE, None).await;
    let response = fixture.pipeline.search(&search_request("Entidad")).await;

    assert_eq!(response.results.len(), 1);
    assert!(response.results[0].event_id.starts_with("BOE:"));

    let news_errors = &response.metadata.source_errors["NewsAPI"];
    assert!(!news_errors.is_empty());
    assert!(news_errors[0].contains("invalid URL"));
}

/// Cache hit within TTL: the second identical search is served from L1
/// with search_method "cached" and well under the fresh-path latency.
#[tokio::test]
async fn second_search_hits_cache() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(FixedAdapter {
        source: Source::Boe,
        records: vec![boe_record(
            "BOE-A-2024-1234",
            "Auto de declaración de concurso",
            "Se declara el concurso de acreedores de Empresa Concurso SA",
            "JUS",
        )],
        error: None,
    })];

    let fixture = build_pipeline(adapters, OFFLINE, OFFLINE, None).await;
    let request = search_request("Empresa Concurso");

    let first = fixture.pipeline.search(&request).await;
    assert_eq!(first.cache_info.search_method, "fresh");

    let second = fixture.pipeline.search(&request).await;
    assert_eq!(second.cache_info.search_method, "cached");
    assert_eq!(second.results.len(), first.results.len());
    assert_eq!(second.results[0].risk_level, RiskLabel::HighLegal);
    assert!(second.performance.total_time_seconds < 1.0);
}

/// force_refresh bypasses a warm cache.
#[tokio::test]
async fn force_refresh_bypasses_cache() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(FixedAdapter {
        source: Source::Boe,
        records: vec![boe_record("BOE-A-2024-5", "Anuncio de licencia", "licencia otorgada", "V")],
        error: None,
    })];

    let fixture = build_pipeline(adapters, OFFLINE, OFFLINE, None).await;
    let mut request = search_request("Empresa");

    let first = fixture.pipeline.search(&request).await;
    assert_eq!(first.cache_info.search_method, "fresh");

    request.force_refresh = true;
    let second = fixture.pipeline.search(&request).await;
    assert_eq!(second.cache_info.search_method, "fresh");
}

/// Records with no usable content take the error path of the raw-doc state
/// machine instead of producing events.
#[tokio::test]
async fn empty_record_is_marked_error_not_event() {
    let empty = crate::models::SourceRecord::default();
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(FixedAdapter {
        source: Source::NewsApi,
        records: vec![empty],
        error: None,
    })];

    let fixture = build_pipeline(adapters, OFFLINE, OFFLINE, None).await;
    let response = fixture.pipeline.search(&search_request("Empresa")).await;

    assert!(response.results.is_empty());
    assert_eq!(response.database_stats.raw_docs_queued, 1);
    assert_eq!(response.database_stats.events_queued, 0);
    assert_eq!(response.overall_risk, RiskColor::Gray);
}

/// Embedding path: a high-risk event is embedded and the vector lands in
/// the warehouse vectors table.
#[tokio::test]
async fn high_risk_events_are_embedded_when_enabled() {
    let embed_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embedding": [0.1, 0.2, 0.3, 0.4]
        })))
        .expect(1)
        .mount(&embed_server)
        .await;

    let warehouse_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/test_project/datasets/test_dataset/tables/vectors/insertAll",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"insert_errors": []})))
        .expect(1)
        .mount(&warehouse_server)
        .await;

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(FixedAdapter {
        source: Source::Boe,
        records: vec![boe_record(
            "BOE-A-2024-9",
            "Auto de concurso",
            "concurso de acreedores de la sociedad",
            "JUS",
        )],
        error: None,
    })];

    let fixture = build_pipeline(
        adapters,
        OFFLINE,
        &warehouse_server.uri(),
        Some(&embed_server.uri()),
    )
    .await;
    let response = fixture.pipeline.search(&search_request("Sociedad")).await;

    assert_eq!(response.database_stats.vectors_stored, 1);
}
