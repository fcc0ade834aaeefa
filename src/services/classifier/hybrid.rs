//! Hybrid classifier: keyword gate first, LLM only for the residue
//!
//! The gate is expected to settle 90%+ of documents; the escalation
//! predicate keeps the LLM spend on documents that actually look legal.
//! Counters are struct-owned and exposed as read-only snapshots.

use serde::Serialize;
use std::sync::Mutex;

use super::keyword_gate::KeywordGate;
use super::llm::{ClassifierError, ClassifyInput, LlmClassifier};
use super::Classification;
use crate::models::{ClassificationMethod, RiskLabel};

/// Keyword result confidence below which the enhancement mode asks the LLM
/// for a second opinion.
const ENHANCEMENT_THRESHOLD: f64 = 0.8;

#[derive(Debug, Default, Clone)]
struct ClassifierStats {
    total: u64,
    keyword_hits: u64,
    llm_calls: u64,
}

/// Read-only view of the classifier counters.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierStatsSnapshot {
    pub total_classifications: u64,
    pub keyword_hits: u64,
    pub llm_calls: u64,
    pub keyword_efficiency: String,
    pub llm_usage: String,
}

/// One result of the batch variant: the chosen classification plus both
/// sub-results and which stage produced the final answer.
#[derive(Debug, Clone, Serialize)]
pub struct BatchClassification {
    #[serde(flatten)]
    pub result: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<Classification>,
    /// "keyword", "llm" or "combined"
    pub source_used: String,
}

pub struct HybridClassifier {
    gate: KeywordGate,
    llm: LlmClassifier,
    stats: Mutex<ClassifierStats>,
}

impl HybridClassifier {
    pub fn new(llm: LlmClassifier) -> Self {
        Self { gate: KeywordGate::new(), llm, stats: Mutex::new(ClassifierStats::default()) }
    }

    pub fn gate(&self) -> &KeywordGate {
        &self.gate
    }

    /// Classify one document. Never fails: LLM trouble degrades to the
    /// conservative default rather than aborting the search.
    pub async fn classify_document(
        &self,
        text: &str,
        title: &str,
        source: &str,
        section: &str,
    ) -> Classification {
        self.bump(|s| s.total += 1);

        let full_text = join_text(title, text);

        // Stage 1: keyword gate
        if let Some(result) = self.gate.classify(&full_text, section) {
            self.bump(|s| s.keyword_hits += 1);
            return result;
        }

        // Stage 2: LLM, but only when the text earns it
        if self.gate.should_escalate(&full_text) {
            self.bump(|s| s.llm_calls += 1);

            match self.llm.classify(text, title, source, section).await {
                Ok(result) => return result,
                Err(e @ ClassifierError::ParseError(_))
                | Err(e @ ClassifierError::Rejected { .. }) => {
                    tracing::warn!("LLM reply unusable, emitting fallback: {}", e);
                    return Classification::new(
                        RiskLabel::NoLegal,
                        0.8,
                        ClassificationMethod::ErrorFallback,
                        format!("LLM reply invalid: {}", e),
                    );
                },
                Err(e) => {
                    tracing::warn!("LLM classify failed, using default: {}", e);
                },
            }
        }

        Classification::new(
            RiskLabel::NoLegal,
            0.8,
            ClassificationMethod::HybridDefault,
            "No legal indicators detected",
        )
    }

    /// Batch variant: gate everything, send the ambiguous subset in a single
    /// LLM request, stitch results back by index preserving input order.
    pub async fn classify_documents_batch(
        &self,
        docs: &[ClassifyInput],
    ) -> Vec<BatchClassification> {
        let mut slots: Vec<Option<BatchClassification>> = Vec::with_capacity(docs.len());
        let mut ambiguous_indices = Vec::new();
        let mut ambiguous_docs = Vec::new();

        for (i, doc) in docs.iter().enumerate() {
            self.bump(|s| s.total += 1);
            let full_text = join_text(&doc.title, &doc.text);

            match self.gate.classify(&full_text, &doc.section) {
                Some(result) => {
                    self.bump(|s| s.keyword_hits += 1);
                    slots.push(Some(BatchClassification {
                        keyword: Some(result.clone()),
                        llm: None,
                        source_used: "keyword".to_string(),
                        result,
                    }));
                },
                None => {
                    ambiguous_indices.push(i);
                    ambiguous_docs.push(doc.clone());
                    slots.push(None);
                },
            }
        }

        if !ambiguous_docs.is_empty() {
            self.bump(|s| s.llm_calls += 1);

            let llm_results = match self.llm.classify_batch(&ambiguous_docs).await {
                Ok(results) => results.into_iter().map(Some).collect::<Vec<_>>(),
                Err(e) => {
                    tracing::warn!(
                        "Batch LLM classify failed for {} docs, using defaults: {}",
                        ambiguous_docs.len(),
                        e
                    );
                    vec![None; ambiguous_docs.len()]
                },
            };

            for (slot_idx, llm_result) in ambiguous_indices.into_iter().zip(llm_results) {
                let entry = match llm_result {
                    Some(result) => BatchClassification {
                        keyword: None,
                        llm: Some(result.clone()),
                        source_used: "llm".to_string(),
                        result,
                    },
                    None => BatchClassification {
                        keyword: None,
                        llm: None,
                        source_used: "llm".to_string(),
                        result: Classification::new(
                            RiskLabel::NoLegal,
                            0.8,
                            ClassificationMethod::HybridDefault,
                            "No legal indicators detected",
                        ),
                    },
                };
                slots[slot_idx] = Some(entry);
            }
        }

        slots.into_iter().flatten().collect()
    }

    /// Confidence-enhancement mode: when the keyword result is weak, get a
    /// second opinion and combine.
    ///
    /// - Labels agree → agreed label with max(conf_kw, conf_llm)
    /// - Labels disagree → LLM label with 0.7·conf_llm + 0.3·conf_kw
    pub async fn classify_with_enhancement(
        &self,
        text: &str,
        title: &str,
        source: &str,
        section: &str,
    ) -> BatchClassification {
        let first = self.classify_document(text, title, source, section).await;

        if first.confidence >= ENHANCEMENT_THRESHOLD {
            return BatchClassification {
                keyword: Some(first.clone()),
                llm: None,
                source_used: "keyword".to_string(),
                result: first,
            };
        }

        self.bump(|s| s.llm_calls += 1);
        let second = match self.llm.classify(text, title, source, section).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Enhancement LLM call failed, keeping first opinion: {}", e);
                return BatchClassification {
                    keyword: Some(first.clone()),
                    llm: None,
                    source_used: "keyword".to_string(),
                    result: first,
                };
            },
        };

        let combined = combine_classifications(&first, &second);
        BatchClassification {
            keyword: Some(first),
            llm: Some(second),
            source_used: "combined".to_string(),
            result: combined,
        }
    }

    pub fn stats(&self) -> ClassifierStatsSnapshot {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let pct = |part: u64| {
            if stats.total == 0 {
                "0.0%".to_string()
            } else {
                format!("{:.1}%", part as f64 / stats.total as f64 * 100.0)
            }
        };

        ClassifierStatsSnapshot {
            total_classifications: stats.total,
            keyword_hits: stats.keyword_hits,
            llm_calls: stats.llm_calls,
            keyword_efficiency: pct(stats.keyword_hits),
            llm_usage: pct(stats.llm_calls),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut ClassifierStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut stats);
    }
}

fn join_text(title: &str, text: &str) -> String {
    format!("{} {}", title, text).trim().to_string()
}

fn combine_classifications(keyword: &Classification, llm: &Classification) -> Classification {
    if keyword.label == llm.label {
        Classification::new(
            keyword.label,
            keyword.confidence.max(llm.confidence),
            ClassificationMethod::HybridEnhanced,
            format!(
                "Both keyword ({:.2}) and LLM ({:.2}) agree on {}",
                keyword.confidence,
                llm.confidence,
                keyword.label.as_str()
            ),
        )
    } else {
        let confidence = 0.7 * llm.confidence + 0.3 * keyword.confidence;
        Classification::new(
            llm.label,
            (confidence * 1000.0).round() / 1000.0,
            ClassificationMethod::HybridEnhanced,
            format!(
                "Keyword classified as {} ({:.2}), LLM as {} ({:.2}); using LLM label with combined confidence {:.2}",
                keyword.label.as_str(),
                keyword.confidence,
                llm.label.as_str(),
                llm.confidence,
                confidence
            ),
        )
    }
}
