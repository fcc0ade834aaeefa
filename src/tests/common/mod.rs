// Common test utilities and helpers

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{CacheConfig, EmbeddingConfig, SourcesConfig};
use crate::models::{SearchRequest, SearchSummary, Source, SourceRecord, SourceResult};
use crate::services::cache::CacheTier;
use crate::services::classifier::{HybridClassifier, LlmClassifier};
use crate::services::embedder::EmbedClient;
use crate::services::orchestrator::SearchOrchestrator;
use crate::services::pipeline::Pipeline;
use crate::services::sources::SourceAdapter;
use crate::services::vector_store::VectorStore;
use crate::services::warehouse::{WarehouseClient, WriteQueue};

/// A canned source adapter: returns fixed records, or fails.
pub struct FixedAdapter {
    pub source: Source,
    pub records: Vec<SourceRecord>,
    pub error: Option<String>,
}

#[async_trait]
impl SourceAdapter for FixedAdapter {
    fn source(&self) -> Source {
        self.source
    }

    async fn search(&self, query: &str, _window: crate::utils::SearchWindow) -> SourceResult {
        let mut errors = Vec::new();
        let records = if let Some(error) = &self.error {
            errors.push(error.clone());
            Vec::new()
        } else {
            self.records.clone()
        };

        SourceResult {
            summary: SearchSummary {
                query: query.to_string(),
                source: self.source.as_str(),
                total_results: records.len(),
                feeds_searched: 1,
                errors,
            },
            records,
        }
    }
}

pub fn boe_record(identificador: &str, titulo: &str, text: &str, seccion: &str) -> SourceRecord {
    SourceRecord {
        title: titulo.to_string(),
        text: text.to_string(),
        url: format!("https://www.boe.es/diario_boe/txt.php?id={}", identificador),
        published_at: "2024-05-02".to_string(),
        section: Some(seccion.to_string()),
        section_name: Some("Administración de Justicia".to_string()),
        identificador: Some(identificador.to_string()),
        ..Default::default()
    }
}

pub fn news_record(title: &str, description: &str) -> SourceRecord {
    SourceRecord {
        title: title.to_string(),
        text: description.to_string(),
        url: "https://example.es/noticia".to_string(),
        published_at: "2024-05-03T09:00:00Z".to_string(),
        ..Default::default()
    }
}

pub fn search_request(company: &str) -> SearchRequest {
    SearchRequest {
        company_name: company.to_string(),
        start_date: Some("2024-05-01".parse().unwrap()),
        end_date: Some("2024-05-07".parse().unwrap()),
        days_back: 7,
        include_boe: true,
        include_news: true,
        include_rss: false,
        include_finance: false,
        force_refresh: false,
        cache_age_hours: 24,
    }
}

/// Wire a pipeline around canned adapters. `classify_url` and
/// `warehouse_url` point at wiremock servers (or unroutable addresses when
/// the test never exercises them); embedding is disabled unless asked for.
pub struct PipelineFixture {
    pub pipeline: Pipeline,
    pub write_queue: Arc<WriteQueue>,
}

pub async fn build_pipeline(
    adapters: Vec<Arc<dyn SourceAdapter>>,
    classify_url: &str,
    warehouse_url: &str,
    embed_url: Option<&str>,
) -> PipelineFixture {
    let warehouse = Arc::new(WarehouseClient::new(warehouse_url, "test_project", "test_dataset"));
    let write_queue = Arc::new(WriteQueue::new(Arc::clone(&warehouse)));

    let cache_config = CacheConfig {
        l1_capacity: 100,
        l1_ttl_secs: 300,
        redis_url: String::new(),
        l2_ttl_secs: 3600,
        cache_age_hours: 24,
    };
    let cache = Arc::new(CacheTier::new(&cache_config, Arc::clone(&warehouse)).await);

    let classifier = Arc::new(HybridClassifier::new(LlmClassifier::new(classify_url, 2)));
    let embed_client = Arc::new(EmbedClient::new(
        embed_url.unwrap_or("http://127.0.0.1:1"),
        "text-embedding-004",
        2,
    ));
    let vector_store = Arc::new(VectorStore::new(Arc::clone(&warehouse), "", 2));
    let orchestrator = Arc::new(SearchOrchestrator::new(adapters, 5));

    let embedding = EmbeddingConfig {
        enabled: embed_url.is_some(),
        max_documents_to_embed: 10,
        embedding_model: "text-embedding-004".to_string(),
    };
    let sources = SourcesConfig::default();

    let pipeline = Pipeline::new(
        orchestrator,
        classifier,
        cache,
        Arc::clone(&write_queue),
        vector_store,
        embed_client,
        embedding,
        &sources,
    );

    PipelineFixture { pipeline, write_queue }
}
