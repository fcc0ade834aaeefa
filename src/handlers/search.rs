//! Company risk search handler

use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::models::{SearchRequest, SearchResponse};
use crate::utils::ApiError;

/// Search all configured sources for a company and classify the results
/// POST /api/search
#[utoipa::path(
    post,
    path = "/api/search",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Classified search results", body = SearchResponse),
        (status = 400, description = "Validation error"),
    ),
    security(("bearer_auth" = [])),
    tag = "Search"
)]
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    tracing::info!(
        "Search request: '{}' ({} days back, force_refresh={})",
        req.company_name,
        req.days_back,
        req.force_refresh
    );

    let response = state.pipeline.search(&req).await;
    Ok(Json(response))
}
