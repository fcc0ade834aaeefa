//! Semantic vector search handler

use axum::{Json, extract::State, response::IntoResponse};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use validator::Validate;

use crate::AppState;
use crate::models::{SemanticSearchRequest, SemanticSearchResponse};
use crate::services::cache::CacheTier;
use crate::services::vector_store::VectorFilters;
use crate::utils::ApiError;

/// Hybrid semantic search over the vector store
/// POST /api/semantic-search
#[utoipa::path(
    post,
    path = "/api/semantic-search",
    request_body = SemanticSearchRequest,
    responses(
        (status = 200, description = "Top-k semantic hits", body = SemanticSearchResponse),
        (status = 400, description = "Validation error"),
        (status = 500, description = "Embedding service unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Search"
)]
pub async fn semantic_search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SemanticSearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let started = Instant::now();

    let cache_key = CacheTier::derive_value_key(
        "semantic",
        &format!(
            "{}|{}|{}",
            req.query,
            req.k,
            req.risk_filter.map(|r| r.as_str()).unwrap_or("")
        ),
    );

    if req.use_cache
        && let Some(cached) = state.cache.get_fast(&cache_key).await
        && let Ok(hits) = serde_json::from_value::<Vec<crate::models::SemanticHit>>(cached)
    {
        return Ok(Json(SemanticSearchResponse {
            status: "success".to_string(),
            query: req.query.clone(),
            search_results: hits,
            source: "cache".to_string(),
            performance_metrics: HashMap::from([(
                "total_time_ms".to_string(),
                started.elapsed().as_millis() as f64,
            )]),
            hybrid_storage: value_to_map(state.vector_store.stats()),
            timestamp: Utc::now().to_rfc3339(),
        }));
    }

    let embed_started = Instant::now();
    let query_vector = state
        .embed_client
        .embed(&req.query)
        .await
        .map_err(|e| ApiError::internal(format!("Embedding service unavailable: {}", e)))?;
    let embed_ms = embed_started.elapsed().as_millis() as f64;

    let filters = VectorFilters {
        risk_level: req.risk_filter.map(|r| r.as_str().to_string()),
        ..Default::default()
    };
    let search_started = Instant::now();
    let hits = state
        .vector_store
        .search(&req.query, &query_vector, req.k, &filters)
        .await;
    let search_ms = search_started.elapsed().as_millis() as f64;

    if req.use_cache
        && let Ok(value) = serde_json::to_value(&hits)
    {
        state.cache.put(&cache_key, &value).await;
    }

    Ok(Json(SemanticSearchResponse {
        status: "success".to_string(),
        query: req.query,
        search_results: hits,
        source: "hybrid".to_string(),
        performance_metrics: HashMap::from([
            ("embed_time_ms".to_string(), embed_ms),
            ("search_time_ms".to_string(), search_ms),
            ("total_time_ms".to_string(), started.elapsed().as_millis() as f64),
        ]),
        hybrid_storage: value_to_map(state.vector_store.stats()),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

fn value_to_map(value: serde_json::Value) -> HashMap<String, serde_json::Value> {
    value
        .as_object()
        .map(|obj| obj.clone().into_iter().collect())
        .unwrap_or_default()
}
