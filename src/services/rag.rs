//! Retrieval-augmented question answering
//!
//! Embeds the question, retrieves the top-k documents from the vector
//! store, and synthesizes an answer with the LLM under a grounded-prompt
//! contract: the model may only use the provided documents and must say so
//! when they are insufficient.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{Language, RagAnalysisResponse, RagDocumentSource, RagQueryRequest, SemanticHit};
use crate::services::embedder::EmbedClient;
use crate::services::generate::GenerateClient;
use crate::services::vector_store::{VectorFilters, VectorStore};

const ANSWER_MAX_TOKENS: u32 = 800;
const ANSWER_TEMPERATURE: f64 = 0.2;
pub const METHODOLOGY: &str = "rag_vector_gemini";

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Embedding is the only hard dependency; without it retrieval is
    /// impossible and the request fails loudly.
    #[error("Embedding service unavailable: {0}")]
    EmbedUnavailable(String),
}

pub struct RagService {
    embedder: Arc<EmbedClient>,
    vector_store: Arc<VectorStore>,
    generator: Arc<GenerateClient>,
}

impl RagService {
    pub fn new(
        embedder: Arc<EmbedClient>,
        vector_store: Arc<VectorStore>,
        generator: Arc<GenerateClient>,
    ) -> Self {
        Self { embedder, vector_store, generator }
    }

    pub async fn ask(&self, request: &RagQueryRequest) -> Result<RagAnalysisResponse, RagError> {
        let started = Instant::now();

        // Step 1: embed the question
        let query_vector = self
            .embedder
            .embed(&request.question)
            .await
            .map_err(|e| RagError::EmbedUnavailable(e.to_string()))?;

        // Step 2: retrieve
        let filters = VectorFilters {
            company_name: request.company_filter.clone(),
            ..Default::default()
        };
        let documents = self
            .vector_store
            .search(&request.question, &query_vector, request.max_documents, &filters)
            .await;

        tracing::info!(
            "RAG retrieved {} documents for question '{}'",
            documents.len(),
            &request.question.chars().take(80).collect::<String>()
        );

        // Steps 3-5: grounded prompt, LLM synthesis, cleanup
        let prompt = build_prompt(&request.question, &documents, request.language);
        let answer = match self
            .generator
            .generate(&prompt, ANSWER_MAX_TOKENS, ANSWER_TEMPERATURE)
            .await
        {
            Ok(raw) => clean_markdown(&raw),
            Err(e) => {
                tracing::error!("RAG synthesis failed: {}", e);
                return Ok(RagAnalysisResponse {
                    question: request.question.clone(),
                    answer: apology(request.language),
                    sources: format_sources(&documents),
                    confidence: 0.0,
                    methodology: METHODOLOGY.to_string(),
                    response_time_ms: started.elapsed().as_millis() as i64,
                    timestamp: Utc::now().to_rfc3339(),
                });
            },
        };

        // Step 6: confidence from mean retrieval relevance
        let confidence = calculate_confidence(&documents);

        Ok(RagAnalysisResponse {
            question: request.question.clone(),
            answer,
            sources: format_sources(&documents),
            confidence,
            methodology: METHODOLOGY.to_string(),
            response_time_ms: started.elapsed().as_millis() as i64,
            timestamp: Utc::now().to_rfc3339(),
        })
    }
}

/// Fixed grounded-prompt preamble plus numbered document blocks.
fn build_prompt(question: &str, documents: &[SemanticHit], language: Language) -> String {
    let context = if documents.is_empty() {
        "No se encontraron documentos relevantes.".to_string()
    } else {
        documents
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let company = doc
                    .metadata
                    .get("company")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("Desconocida");
                format!(
                    "\nDOCUMENTO {} (Relevancia: {:.2}, Empresa: {}):\n{}\n",
                    i + 1,
                    doc.score,
                    company,
                    if doc.document.is_empty() { "Sin contenido" } else { &doc.document }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let language_instruction = match language {
        Language::Es => {
            "Responde en español. Proporciona un análisis ejecutivo claro y profesional."
        },
        Language::En => "Respond in English. Provide a clear and professional executive analysis.",
    };

    format!(
        "Eres un experto en análisis de riesgos corporativos D&O (Directores y Administradores). \
         Analiza la siguiente pregunta basándote ÚNICAMENTE en los documentos proporcionados.\n\
         \n\
         PREGUNTA: {question}\n\
         \n\
         DOCUMENTOS DE CONTEXTO:\n\
         {context}\n\
         \n\
         INSTRUCCIONES:\n\
         1. {language_instruction}\n\
         2. Basa tu respuesta SOLO en la información de los documentos\n\
         3. Si no hay información suficiente, dilo claramente\n\
         4. Destaca los riesgos clave y su impacto potencial\n\
         5. Proporciona información accionable para ejecutivos\n\
         6. Mantén un tono profesional y conciso\n\
         7. Menciona las fuentes cuando sea relevante\n\
         \n\
         ANÁLISIS:\n"
    )
}

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("bold pattern"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*([^*]+)\*").expect("italic pattern"));
static STRAY_ASTERISKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*+").expect("stray pattern"));
static BLANK_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n\s*\n").expect("blank-run pattern"));
static LEADING_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]+").expect("leading pattern"));

/// Strip markdown bold/italic markers and collapse runs of blank lines.
pub fn clean_markdown(text: &str) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    let text = STRAY_ASTERISKS.replace_all(&text, "");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    let text = LEADING_WS.replace_all(&text, "");
    text.trim().to_string()
}

/// min(100, 100·mean(score)) rounded to one decimal; 0 with no documents.
pub fn calculate_confidence(documents: &[SemanticHit]) -> f64 {
    if documents.is_empty() {
        return 0.0;
    }

    let mean: f64 = documents.iter().map(|d| d.score).sum::<f64>() / documents.len() as f64;
    let confidence = (mean * 100.0).min(100.0);
    (confidence * 10.0).round() / 10.0
}

fn apology(language: Language) -> String {
    match language {
        Language::Es => {
            "Lo siento, no pude generar un análisis en este momento debido a un error del servicio."
                .to_string()
        },
        Language::En => {
            "Sorry, an analysis could not be generated at this time due to a service error."
                .to_string()
        },
    }
}

fn format_sources(documents: &[SemanticHit]) -> Vec<RagDocumentSource> {
    documents
        .iter()
        .map(|doc| {
            let get = |key: &str| {
                doc.metadata
                    .get(key)
                    .and_then(serde_json::Value::as_str)
                    .map(|s| s.to_string())
            };

            let text_preview = if doc.document.chars().count() > 200 {
                format!("{}...", doc.document.chars().take(200).collect::<String>())
            } else {
                doc.document.clone()
            };

            RagDocumentSource {
                id: doc.id.clone(),
                score: (doc.score * 100.0).round() / 100.0,
                title: get("titulo")
                    .unwrap_or_else(|| "Sin título".to_string())
                    .chars()
                    .take(100)
                    .collect(),
                company: get("company").unwrap_or_else(|| "Desconocida".to_string()),
                date: get("fecha").unwrap_or_else(|| "Fecha desconocida".to_string()),
                source: get("source").unwrap_or_else(|| "Fuente desconocida".to_string()),
                text_preview,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn hit(id: &str, score: f64, company: &str) -> SemanticHit {
        SemanticHit {
            id: id.to_string(),
            score,
            metadata: HashMap::from([
                ("company".to_string(), json!(company)),
                ("titulo".to_string(), json!("Sanción regulatoria")),
                ("fecha".to_string(), json!("2024-05-01")),
                ("source".to_string(), json!("BOE")),
            ]),
            document: "La CNMV impuso una sanción a la entidad por incumplimiento".to_string(),
        }
    }

    #[test]
    fn confidence_is_zero_without_documents() {
        assert_eq!(calculate_confidence(&[]), 0.0);
    }

    #[test]
    fn confidence_is_capped_mean() {
        let docs = vec![hit("a", 0.8, "X"), hit("b", 0.6, "X")];
        assert_eq!(calculate_confidence(&docs), 70.0);

        let docs = vec![hit("a", 1.4, "X")];
        assert_eq!(calculate_confidence(&docs), 100.0);
    }

    #[test]
    fn markdown_is_stripped() {
        let raw = "**Riesgo alto** detectado.\n\n\n\nEl *regulador* actuó.\n   Sin sangría.";
        let clean = clean_markdown(raw);
        assert!(!clean.contains('*'));
        assert!(clean.contains("Riesgo alto detectado."));
        assert!(!clean.contains("\n\n\n"));
        assert!(clean.contains("\nSin sangría"));
    }

    #[test]
    fn prompt_numbers_documents_with_relevance_and_company() {
        let docs = vec![hit("a", 0.91, "Banco X"), hit("b", 0.52, "Banco X")];
        let prompt = build_prompt("¿Riesgos de Banco X?", &docs, Language::Es);
        assert!(prompt.contains("DOCUMENTO 1 (Relevancia: 0.91, Empresa: Banco X):"));
        assert!(prompt.contains("DOCUMENTO 2 (Relevancia: 0.52, Empresa: Banco X):"));
        assert!(prompt.contains("ÚNICAMENTE"));
        assert!(prompt.contains("Responde en español"));
    }

    #[test]
    fn empty_context_prompt_says_so() {
        let prompt = build_prompt("¿Riesgos?", &[], Language::En);
        assert!(prompt.contains("No se encontraron documentos relevantes."));
        assert!(prompt.contains("Respond in English"));
    }

    #[test]
    fn sources_are_previewed_and_rounded() {
        let mut doc = hit("a", 0.8765, "Banco X");
        doc.document = "x".repeat(300);
        let sources = format_sources(&[doc]);
        assert_eq!(sources[0].score, 0.88);
        assert!(sources[0].text_preview.ends_with("..."));
        assert_eq!(sources[0].text_preview.chars().count(), 203);
    }
}
