pub mod assessment;
pub mod cache;
pub mod classifier;
pub mod embedder;
pub mod generate;
pub mod orchestrator;
pub mod pipeline;
pub mod rag;
pub mod sources;
pub mod user_service;
pub mod vector_store;
pub mod warehouse;

pub use assessment::AssessmentScorer;
pub use cache::CacheTier;
pub use classifier::{
    BatchClassification, Classification, ClassifierStatsSnapshot, ClassifyInput, HybridClassifier,
    KeywordGate, LlmClassifier,
};
pub use embedder::EmbedClient;
pub use generate::GenerateClient;
pub use orchestrator::SearchOrchestrator;
pub use pipeline::{Pipeline, RetentionVacuum};
pub use rag::{RagError, RagService};
pub use sources::{SourceAdapter, build_adapters};
pub use user_service::UserService;
pub use vector_store::{VectorFilters, VectorMetadata, VectorStore};
pub use warehouse::{WarehouseClient, WriteOperation, WriteQueue};
