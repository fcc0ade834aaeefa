//! Centinela Library
//!
//! This library contains all the core modules for the Centinela D&O risk
//! intelligence application.

use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    AssessmentScorer, CacheTier, EmbedClient, GenerateClient, HybridClassifier, Pipeline,
    RagService, SearchOrchestrator, UserService, VectorStore, WarehouseClient, WriteQueue,
};
pub use utils::JwtUtil;

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All services are wrapped in Arc for cheap cloning and thread safety.
#[derive(Clone)]
pub struct AppState {
    pub jwt_util: Arc<JwtUtil>,

    pub warehouse: Arc<WarehouseClient>,
    pub write_queue: Arc<WriteQueue>,
    pub cache: Arc<CacheTier>,
    pub classifier: Arc<HybridClassifier>,
    pub embed_client: Arc<EmbedClient>,
    pub vector_store: Arc<VectorStore>,
    pub pipeline: Arc<Pipeline>,
    pub rag_service: Arc<RagService>,
    pub user_service: Arc<UserService>,
}
