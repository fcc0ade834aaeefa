//! Request and response bodies for the REST surface

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use validator::Validate;

use super::event::{ClassificationMethod, RiskColor, RiskLabel};

// ============================================================================
// POST /api/search
// ============================================================================

fn default_days_back() -> i64 {
    7
}
fn default_true() -> bool {
    true
}
fn default_cache_age_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SearchRequest {
    #[validate(length(min = 1, max = 200))]
    pub company_name: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default = "default_true")]
    pub include_boe: bool,
    #[serde(default = "default_true")]
    pub include_news: bool,
    #[serde(default = "default_true")]
    pub include_rss: bool,
    #[serde(default)]
    pub include_finance: bool,
    #[serde(default)]
    pub force_refresh: bool,
    #[serde(default = "default_cache_age_hours")]
    pub cache_age_hours: i64,
}

/// One classified result item in the search envelope.
/// `risk_color` is part of the UI contract and always present.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchResultItem {
    pub event_id: String,
    pub source: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub risk_level: RiskLabel,
    pub confidence: f64,
    pub method: ClassificationMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub risk_color: RiskColor,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub date_parse_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct SearchMetadata {
    pub total_results: usize,
    pub high_risk_results: usize,
    pub sources_searched: Vec<String>,
    pub source_errors: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct PerformanceInfo {
    pub total_time_seconds: f64,
    pub keyword_efficiency: String,
    pub llm_calls: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CacheInfo {
    /// "cached" or "fresh"
    pub search_method: String,
    pub age_hours: i64,
    pub total_events: usize,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, ToSchema)]
pub struct DatabaseStats {
    pub raw_docs_queued: usize,
    pub events_queued: usize,
    pub duplicates_skipped: usize,
    pub vectors_stored: usize,
}

/// Envelope returned by `/api/search`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    pub company_name: String,
    pub search_date: String,
    pub date_range: DateRange,
    pub results: Vec<SearchResultItem>,
    pub metadata: SearchMetadata,
    pub performance: PerformanceInfo,
    pub cache_info: CacheInfo,
    pub database_stats: DatabaseStats,
    pub overall_risk: RiskColor,
    pub risk_summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

// ============================================================================
// POST /api/semantic-search
// ============================================================================

fn default_k() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SemanticSearchRequest {
    #[validate(length(min = 1))]
    pub query: String,
    #[serde(default = "default_k")]
    #[validate(range(min = 1, max = 50))]
    pub k: usize,
    #[serde(default)]
    pub risk_filter: Option<RiskLabel>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SemanticHit {
    pub id: String,
    pub score: f64,
    #[schema(value_type = Object)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub document: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SemanticSearchResponse {
    pub status: String,
    pub query: String,
    pub search_results: Vec<SemanticHit>,
    /// Which backend(s) produced the hits
    pub source: String,
    pub performance_metrics: HashMap<String, f64>,
    #[schema(value_type = Object)]
    pub hybrid_storage: HashMap<String, serde_json::Value>,
    pub timestamp: String,
}

// ============================================================================
// POST /api/nlp/ask
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Es,
    En,
}

fn default_max_documents() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RagQueryRequest {
    /// Natural language question about corporate risks
    #[validate(length(min = 10))]
    pub question: String,
    #[serde(default = "default_max_documents")]
    #[validate(range(min = 1, max = 10))]
    pub max_documents: usize,
    #[serde(default)]
    pub company_filter: Option<String>,
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RagDocumentSource {
    pub id: String,
    pub score: f64,
    pub title: String,
    pub company: String,
    pub date: String,
    pub source: String,
    pub text_preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RagAnalysisResponse {
    pub question: String,
    pub answer: String,
    pub sources: Vec<RagDocumentSource>,
    /// 0..=100, derived from mean retrieval relevance
    pub confidence: f64,
    pub methodology: String,
    pub response_time_ms: i64,
    pub timestamp: String,
}

// ============================================================================
// POST /api/assess
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AssessmentRequest {
    #[validate(length(min = 1, max = 200))]
    pub company_name: String,
    #[serde(default)]
    pub company_vat: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_days_back")]
    pub days_back: i64,
    #[serde(default = "default_true")]
    pub include_boe: bool,
    #[serde(default = "default_true")]
    pub include_news: bool,
    #[serde(default = "default_true")]
    pub include_rss: bool,
    #[serde(default)]
    pub include_finance: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AssessmentResponse {
    #[serde(flatten)]
    pub assessment: super::assessment::Assessment,
    /// Disposition of the warehouse write for this assessment
    pub warehouse_status: String,
}

// ============================================================================
// GET /api/status
// ============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusResponse {
    #[schema(value_type = Object)]
    pub classifier: serde_json::Value,
    #[schema(value_type = Object)]
    pub cache: serde_json::Value,
    #[schema(value_type = Object)]
    pub write_queue: serde_json::Value,
    #[schema(value_type = Object)]
    pub vector_store: serde_json::Value,
}
