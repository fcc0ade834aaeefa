//! Natural-language risk analysis handler (RAG)

use axum::{Json, extract::State, response::IntoResponse};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::models::{RagAnalysisResponse, RagQueryRequest};
use crate::services::rag::RagError;
use crate::utils::ApiError;

/// Ask a natural-language question about corporate risks
/// POST /api/nlp/ask
///
/// Examples:
/// - "¿Cuáles son los riesgos actuales para Banco Santander?"
/// - "What financial risks affect Spanish energy companies?"
#[utoipa::path(
    post,
    path = "/api/nlp/ask",
    request_body = RagQueryRequest,
    responses(
        (status = 200, description = "Grounded analysis", body = RagAnalysisResponse),
        (status = 400, description = "Validation error"),
        (status = 500, description = "Embedding service unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Analysis"
)]
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RagQueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    tracing::info!(
        "RAG query: '{}' (max_documents={}, company_filter={:?})",
        req.question.chars().take(100).collect::<String>(),
        req.max_documents,
        req.company_filter
    );

    let response = state.rag_service.ask(&req).await.map_err(|e| match e {
        RagError::EmbedUnavailable(reason) => {
            ApiError::internal(format!("Embedding service unavailable: {}", reason))
        },
    })?;

    tracing::info!(
        "RAG analysis completed: {} sources, {}% confidence",
        response.sources.len(),
        response.confidence
    );

    Ok(Json(response))
}
