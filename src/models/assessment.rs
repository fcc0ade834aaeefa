//! Risk assessment output model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Categorical risk rating for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RiskRating {
    Green,
    Orange,
    Red,
}

impl RiskRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Orange => "orange",
            Self::Red => "red",
        }
    }

    /// Shared thresholds: ≥70 red, ≥40 orange, else green.
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            Self::Red
        } else if score >= 40.0 {
            Self::Orange
        } else {
            Self::Green
        }
    }
}

/// Result-count breakdown over the assessed window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ResultBreakdown {
    pub total_results_found: usize,
    pub high_risk_results: usize,
    pub medium_risk_results: usize,
    pub low_risk_results: usize,
}

/// The output of the assessment scorer for one (company, user, window).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Assessment {
    pub assessment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_vat: Option<String>,
    pub user_id: String,
    pub company_name: String,

    pub turnover_risk: RiskRating,
    pub shareholding_risk: RiskRating,
    pub bankruptcy_risk: RiskRating,
    pub legal_risk: RiskRating,
    pub corruption_risk: RiskRating,
    pub overall_risk: RiskRating,

    pub financial_score: f64,
    pub legal_score: f64,
    pub press_score: f64,
    pub composite_score: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_date_range_start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_date_range_end: Option<NaiveDate>,
    pub sources_searched: Vec<String>,
    pub breakdown: ResultBreakdown,
    pub analysis_summary: String,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}
