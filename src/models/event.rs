//! Core ingest records: raw documents and normalized events

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use super::source::Source;

// ============================================================================
// Risk taxonomy
// ============================================================================

/// 4-tier × 3-category risk taxonomy plus No-Legal / Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ToSchema)]
pub enum RiskLabel {
    HighLegal,
    HighFinancial,
    HighRegulatory,
    MediumLegal,
    MediumOperational,
    LowLegal,
    LowOperational,
    NoLegal,
    Unknown,
}

/// UI traffic-light color a label maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RiskColor {
    Red,
    Orange,
    Green,
    Gray,
}

impl RiskColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Orange => "orange",
            Self::Green => "green",
            Self::Gray => "gray",
        }
    }
}

impl RiskLabel {
    pub const ALL: [RiskLabel; 9] = [
        RiskLabel::HighLegal,
        RiskLabel::HighFinancial,
        RiskLabel::HighRegulatory,
        RiskLabel::MediumLegal,
        RiskLabel::MediumOperational,
        RiskLabel::LowLegal,
        RiskLabel::LowOperational,
        RiskLabel::NoLegal,
        RiskLabel::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighLegal => "High-Legal",
            Self::HighFinancial => "High-Financial",
            Self::HighRegulatory => "High-Regulatory",
            Self::MediumLegal => "Medium-Legal",
            Self::MediumOperational => "Medium-Operational",
            Self::LowLegal => "Low-Legal",
            Self::LowOperational => "Low-Operational",
            Self::NoLegal => "No-Legal",
            Self::Unknown => "Unknown",
        }
    }

    /// Strict parse; used to validate LLM replies.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.as_str() == s)
    }

    /// Total color mapping: High → red, Medium → orange,
    /// Low / No-Legal → green, anything else → gray.
    pub fn color(&self) -> RiskColor {
        match self {
            Self::HighLegal | Self::HighFinancial | Self::HighRegulatory => RiskColor::Red,
            Self::MediumLegal | Self::MediumOperational => RiskColor::Orange,
            Self::LowLegal | Self::LowOperational | Self::NoLegal => RiskColor::Green,
            Self::Unknown => RiskColor::Gray,
        }
    }

    pub fn is_high(&self) -> bool {
        matches!(self, Self::HighLegal | Self::HighFinancial | Self::HighRegulatory)
    }

    pub fn is_medium(&self) -> bool {
        matches!(self, Self::MediumLegal | Self::MediumOperational)
    }
}

impl Serialize for RiskLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RiskLabel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RiskLabel::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown risk label: {}", s)))
    }
}

/// How an event acquired its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    KeywordSection,
    KeywordHighLegal,
    KeywordHighFinancial,
    KeywordHighRegulatory,
    KeywordMediumLegal,
    KeywordMediumOperational,
    KeywordLowLegal,
    KeywordLowOperational,
    KeywordNoLegal,
    KeywordShortText,
    Cached,
    HybridLlm,
    HybridDefault,
    HybridEnhanced,
    ErrorFallback,
}

impl ClassificationMethod {
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Self::KeywordSection
                | Self::KeywordHighLegal
                | Self::KeywordHighFinancial
                | Self::KeywordHighRegulatory
                | Self::KeywordMediumLegal
                | Self::KeywordMediumOperational
                | Self::KeywordLowLegal
                | Self::KeywordLowOperational
                | Self::KeywordNoLegal
                | Self::KeywordShortText
        )
    }
}

// ============================================================================
// Raw documents
// ============================================================================

/// Disposition of a raw document within the ingest state machine.
/// Absent means "not yet parsed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawDocStatus {
    Parsed,
    Error,
    Dlq,
}

/// Retries after which a failing raw doc is dead-lettered.
pub const RAW_DOC_MAX_RETRIES: u32 = 5;

/// An immutable source record, keyed by the fingerprint of its canonical
/// payload. Mutated only to advance `status` and `retries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDoc {
    /// 64-hex SHA-256 of the canonical payload bytes
    pub raw_id: String,
    pub source: Source,
    /// Original payload bytes (base64 in warehouse storage)
    pub payload: Vec<u8>,
    pub meta: HashMap<String, String>,
    pub fetched_at: DateTime<Utc>,
    pub retries: u32,
    pub status: Option<RawDocStatus>,
}

impl RawDoc {
    pub fn mark_parsed(&mut self) {
        self.status = Some(RawDocStatus::Parsed);
    }

    /// Transient failure: bump retries, dead-letter once the budget is spent.
    pub fn mark_error(&mut self) {
        self.retries += 1;
        if self.retries >= RAW_DOC_MAX_RETRIES {
            self.status = Some(RawDocStatus::Dlq);
        } else {
            self.status = Some(RawDocStatus::Error);
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// A normalized, classifiable unit extracted from a RawDoc.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Event {
    /// `"<SOURCE>:<raw_id>"`
    pub event_id: String,
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<NaiveDate>,
    /// The pub_date fell back to "now" because the source string was unparseable
    #[serde(default)]
    pub date_parse_error: bool,
    #[schema(value_type = String)]
    pub source: Source,
    pub company_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_label: Option<RiskLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_method: Option<ClassificationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_status: Option<EmbeddingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub alerted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Vectorised,
}

impl Event {
    pub fn event_id_for(source: Source, raw_id: &str) -> String {
        format!("{}:{}", source.as_str(), raw_id)
    }

    /// Attach a classification outcome, stamping `classifier_ts`.
    pub fn apply_classification(
        &mut self,
        label: RiskLabel,
        confidence: f64,
        method: ClassificationMethod,
        rationale: impl Into<String>,
    ) {
        self.risk_label = Some(label);
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self.classification_method = Some(method);
        self.rationale = Some(rationale.into());
        self.classifier_ts = Some(Utc::now());
    }

    pub fn risk_color(&self) -> RiskColor {
        self.risk_label.map(|l| l.color()).unwrap_or(RiskColor::Gray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_label_maps_to_exactly_one_color() {
        for label in RiskLabel::ALL {
            // color() is total by construction; pin the tier mapping
            match label {
                l if l.is_high() => assert_eq!(l.color(), RiskColor::Red),
                l if l.is_medium() => assert_eq!(l.color(), RiskColor::Orange),
                RiskLabel::Unknown => assert_eq!(label.color(), RiskColor::Gray),
                _ => assert_eq!(label.color(), RiskColor::Green),
            }
        }
    }

    #[test]
    fn label_parse_round_trip() {
        for label in RiskLabel::ALL {
            assert_eq!(RiskLabel::parse(label.as_str()), Some(label));
        }
        assert_eq!(RiskLabel::parse("Very-High"), None);
    }

    #[test]
    fn raw_doc_dead_letters_after_budget() {
        let mut doc = RawDoc {
            raw_id: "ab".repeat(32),
            source: Source::Boe,
            payload: b"{}".to_vec(),
            meta: HashMap::new(),
            fetched_at: Utc::now(),
            retries: 0,
            status: None,
        };

        for _ in 0..RAW_DOC_MAX_RETRIES - 1 {
            doc.mark_error();
            assert_eq!(doc.status, Some(RawDocStatus::Error));
        }
        doc.mark_error();
        assert_eq!(doc.status, Some(RawDocStatus::Dlq));
        assert_eq!(doc.retries, RAW_DOC_MAX_RETRIES);
    }

    #[test]
    fn classification_stamps_timestamp_and_clamps_confidence() {
        let mut event = Event {
            event_id: Event::event_id_for(Source::Boe, "deadbeef"),
            title: String::new(),
            text: String::new(),
            section: None,
            url: String::new(),
            pub_date: None,
            date_parse_error: false,
            source: Source::Boe,
            company_name: "Empresa SA".to_string(),
            risk_label: None,
            confidence: None,
            rationale: None,
            classification_method: None,
            classifier_ts: None,
            embedding_status: None,
            embedding_model: None,
            alerted: false,
            created_at: Utc::now(),
        };

        assert!(event.event_id.starts_with("BOE:"));
        event.apply_classification(
            RiskLabel::HighLegal,
            1.7,
            ClassificationMethod::KeywordSection,
            "section JUS",
        );
        assert_eq!(event.confidence, Some(1.0));
        assert!(event.classifier_ts.is_some());
    }

    #[test]
    fn method_serializes_snake_case() {
        let json = serde_json::to_string(&ClassificationMethod::HybridLlm).unwrap();
        assert_eq!(json, "\"hybrid_llm\"");
        let json = serde_json::to_string(&ClassificationMethod::KeywordShortText).unwrap();
        assert_eq!(json, "\"keyword_short_text\"");
    }
}
