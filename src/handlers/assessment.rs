//! Risk assessment handler

use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::middleware::AuthUser;
use crate::models::{Assessment, AssessmentRequest, AssessmentResponse, Company, SearchRequest};
use crate::services::AssessmentScorer;
use crate::services::warehouse::{WriteOperation, tables};
use crate::utils::{ApiError, SearchWindow};

/// Run a full risk assessment for a company
/// POST /api/assess
#[utoipa::path(
    post,
    path = "/api/assess",
    request_body = AssessmentRequest,
    responses(
        (status = 200, description = "Risk assessment", body = AssessmentResponse),
        (status = 400, description = "Validation error"),
    ),
    security(("bearer_auth" = [])),
    tag = "Analysis"
)]
pub async fn assess(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<AssessmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let search_request = SearchRequest {
        company_name: req.company_name.clone(),
        start_date: req.start_date,
        end_date: req.end_date,
        days_back: req.days_back,
        include_boe: req.include_boe,
        include_news: req.include_news,
        include_rss: req.include_rss,
        include_finance: req.include_finance,
        force_refresh: false,
        cache_age_hours: 24,
    };

    let search = state.pipeline.search(&search_request).await;
    let window = SearchWindow { start: search.date_range.start, end: search.date_range.end };

    let assessment = AssessmentScorer::score(
        &req.company_name,
        req.company_vat.clone(),
        &user.user_id,
        window,
        search.metadata.sources_searched.clone(),
        &search.results,
    );

    persist_assessment(&state, &assessment);

    Ok(Json(AssessmentResponse { assessment, warehouse_status: "queued".to_string() }))
}

/// Queue the assessment and the company risk summary for persistence.
fn persist_assessment(state: &AppState, assessment: &Assessment) {
    let row = json!({
        "assessment_id": assessment.assessment_id,
        "company_vat": assessment.company_vat,
        "user_id": assessment.user_id,
        "company_name": assessment.company_name,
        "turnover_risk": assessment.turnover_risk,
        "shareholding_risk": assessment.shareholding_risk,
        "bankruptcy_risk": assessment.bankruptcy_risk,
        "legal_risk": assessment.legal_risk,
        "corruption_risk": assessment.corruption_risk,
        "overall_risk": assessment.overall_risk,
        "financial_score": assessment.financial_score,
        "legal_score": assessment.legal_score,
        "press_score": assessment.press_score,
        "composite_score": assessment.composite_score,
        "search_date_range_start": assessment.search_date_range_start,
        "search_date_range_end": assessment.search_date_range_end,
        "sources_searched": serde_json::to_string(&assessment.sources_searched)
            .unwrap_or_default(),
        "total_results_found": assessment.breakdown.total_results_found,
        "high_risk_results": assessment.breakdown.high_risk_results,
        "medium_risk_results": assessment.breakdown.medium_risk_results,
        "low_risk_results": assessment.breakdown.low_risk_results,
        "analysis_summary": assessment.analysis_summary,
        "key_findings": serde_json::to_string(&assessment.key_findings).unwrap_or_default(),
        "recommendations": serde_json::to_string(&assessment.recommendations)
            .unwrap_or_default(),
    });
    state
        .write_queue
        .enqueue(tables::ASSESSMENTS, vec![row], WriteOperation::Upsert, 1);

    let company = Company {
        name: assessment.company_name.clone(),
        vat: assessment.company_vat.clone(),
        ticker: None,
        last_overall_risk: Some(assessment.overall_risk),
        last_assessed_at: Some(assessment.created_at),
        created_at: assessment.created_at,
        updated_at: assessment.created_at,
    };
    if let Ok(company_row) = serde_json::to_value(&company) {
        state
            .write_queue
            .enqueue(tables::COMPANIES, vec![company_row], WriteOperation::Upsert, 2);
    }
}
