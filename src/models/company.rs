//! Company identity and last-known risk summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::assessment::RiskRating;

/// Keyed by name (unique); VAT is the optional canonical identifier.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Company {
    /// Unique company name as searched
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_overall_risk: Option<RiskRating>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_assessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
