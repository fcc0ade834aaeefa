//! RAG question-answering scenarios against mocked cloud services

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::models::{Language, RagQueryRequest};
use crate::services::embedder::EmbedClient;
use crate::services::generate::GenerateClient;
use crate::services::rag::{METHODOLOGY, RagService};
use crate::services::vector_store::{VectorMetadata, VectorStore};
use crate::services::warehouse::WarehouseClient;

const OFFLINE: &str = "http://127.0.0.1:1";

fn request(question: &str, company: Option<&str>, language: Language) -> RagQueryRequest {
    RagQueryRequest {
        question: question.to_string(),
        max_documents: 3,
        company_filter: company.map(|c| c.to_string()),
        language,
    }
}

async fn rag_with_servers(embed_uri: &str, generate_uri: &str) -> (RagService, Arc<VectorStore>) {
    // Warehouse stays offline: retrieval in these tests rides the local index
    let warehouse = Arc::new(WarehouseClient::new(OFFLINE, "p", "d"));
    let vector_store = Arc::new(VectorStore::new(Arc::clone(&warehouse), "", 2));
    let service = RagService::new(
        Arc::new(EmbedClient::new(embed_uri, "text-embedding-004", 2)),
        Arc::clone(&vector_store),
        Arc::new(GenerateClient::new(generate_uri, 2)),
    );
    (service, vector_store)
}

async fn index_sanction_doc(store: &VectorStore, company: &str) {
    // Direct local-index insert via add(); warehouse write fails silently
    let metadata = VectorMetadata {
        company_name: Some(company.to_string()),
        risk_level: Some("High-Regulatory".to_string()),
        publication_date: Some("2024-05-01".to_string()),
        source: Some("BOE".to_string()),
        title: Some("Sanción del regulador".to_string()),
        text_summary: None,
        embedding_model: "text-embedding-004".to_string(),
    };
    let _ = store
        .add(
            "BOE:sanction1",
            &[1.0, 0.0, 0.0, 0.0],
            &metadata,
            "El regulador impuso una sanción grave a Banco X por deficiencias de control",
        )
        .await;
}

/// Grounded answer scenario: Spanish answer, sources carry the company,
/// markdown stripped.
#[tokio::test]
async fn grounded_answer_in_spanish() {
    let embed_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embedding": [1.0, 0.0, 0.0, 0.0]
        })))
        .mount(&embed_server)
        .await;

    let generate_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_partial_json(json!({"max_tokens": 800, "temperature": 0.2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "**Banco X** afronta un riesgo regulatorio *elevado* por la sanción reciente."
        })))
        .mount(&generate_server)
        .await;

    let (service, store) = rag_with_servers(&embed_server.uri(), &generate_server.uri()).await;
    index_sanction_doc(&store, "Banco X").await;

    let response = service
        .ask(&request(
            "¿Cuáles son los riesgos actuales para Banco X?",
            Some("Banco X"),
            Language::Es,
        ))
        .await
        .unwrap();

    assert!(!response.answer.contains("**"));
    assert!(!response.answer.starts_with('*'));
    assert!(response.answer.contains("riesgo regulatorio"));
    assert!(response.sources.iter().any(|s| s.company == "Banco X"));
    assert!(response.confidence > 0.0);
    assert_eq!(response.methodology, METHODOLOGY);
}

/// Zero retrieved documents: the LLM is still called with an empty-context
/// prompt and confidence is exactly 0.
#[tokio::test]
async fn empty_retrieval_still_answers_with_zero_confidence() {
    let embed_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embedding": [0.5, 0.5, 0.0, 0.0]
        })))
        .mount(&embed_server)
        .await;

    let generate_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "No hay información suficiente en los documentos disponibles."
        })))
        .expect(1)
        .mount(&generate_server)
        .await;

    let (service, _store) = rag_with_servers(&embed_server.uri(), &generate_server.uri()).await;

    let response = service
        .ask(&request("¿Riesgos de una empresa sin documentos?", None, Language::Es))
        .await
        .unwrap();

    assert_eq!(response.confidence, 0.0);
    assert!(response.sources.is_empty());
    assert!(!response.answer.is_empty());
}

/// LLM failure: non-empty localized apology, confidence 0.
#[tokio::test]
async fn llm_failure_returns_apology() {
    let embed_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "embedding": [1.0, 0.0, 0.0, 0.0]
        })))
        .mount(&embed_server)
        .await;

    // Generate service is down
    let (service, store) = rag_with_servers(&embed_server.uri(), OFFLINE).await;
    index_sanction_doc(&store, "Banco X").await;

    let es = service
        .ask(&request("¿Cuáles son los riesgos para Banco X?", None, Language::Es))
        .await
        .unwrap();
    assert!(es.answer.contains("Lo siento"));
    assert_eq!(es.confidence, 0.0);

    let en = service
        .ask(&request("What are the current risks for Banco X?", None, Language::En))
        .await
        .unwrap();
    assert!(en.answer.contains("Sorry"));
    assert_eq!(en.confidence, 0.0);
}

/// Embed service down: the request fails loudly with the reason.
#[tokio::test]
async fn embed_failure_is_a_hard_error() {
    let (service, _store) = rag_with_servers(OFFLINE, OFFLINE).await;

    let error = service
        .ask(&request("¿Riesgos de cualquier empresa española?", None, Language::Es))
        .await
        .unwrap_err();

    let message = error.to_string();
    assert!(message.contains("Embedding service unavailable"));
}
