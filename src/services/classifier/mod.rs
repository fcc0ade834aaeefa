//! Two-stage hybrid document classifier
//!
//! Stage 1 is a deterministic keyword gate that settles the overwhelming
//! majority of documents in microseconds. Stage 2 escalates the residual
//! ambiguous set to a remote LLM behind a strict JSON contract.
//!
//! ```text
//! ┌──────────────┐  hit   ┌────────────┐
//! │ KeywordGate  │──────▶ │ keyword_*  │
//! └──────┬───────┘        └────────────┘
//!        │ miss
//!        ▼
//! ┌──────────────┐  yes   ┌────────────┐  fail  ┌────────────────┐
//! │ escalation   │──────▶ │ LLM remote │──────▶ │ hybrid_default │
//! │ predicate    │        └────────────┘        └────────────────┘
//! └──────┬───────┘
//!        │ no
//!        ▼
//!  hybrid_default
//! ```

mod hybrid;
mod keyword_gate;
mod llm;

pub use hybrid::{BatchClassification, ClassifierStatsSnapshot, HybridClassifier};
pub use keyword_gate::KeywordGate;
pub use llm::{ClassifierError, ClassifyInput, LlmClassifier};

use crate::models::{ClassificationMethod, RiskLabel};
use serde::{Deserialize, Serialize};

/// Outcome of classifying one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub label: RiskLabel,
    pub confidence: f64,
    pub method: ClassificationMethod,
    pub rationale: String,
}

impl Classification {
    pub fn new(
        label: RiskLabel,
        confidence: f64,
        method: ClassificationMethod,
        rationale: impl Into<String>,
    ) -> Self {
        Self { label, confidence, method, rationale: rationale.into() }
    }
}
