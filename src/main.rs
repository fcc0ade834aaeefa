use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use centinela::config::Config;
use centinela::models;
use centinela::services::{
    CacheTier, EmbedClient, GenerateClient, HybridClassifier, LlmClassifier, Pipeline, RagService,
    RetentionVacuum, SearchOrchestrator, UserService, VectorStore, WarehouseClient, WriteQueue,
    build_adapters,
};
use centinela::utils::{JwtUtil, ScheduledExecutor};
use centinela::{AppState, handlers, middleware};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::get_me,

        handlers::search::search,
        handlers::semantic::semantic_search,
        handlers::nlp::ask,
        handlers::assessment::assess,

        handlers::system::get_status,
    ),
    components(
        schemas(
            models::RegisterRequest,
            models::LoginRequest,
            models::LoginResponse,
            models::UserResponse,
            models::SearchRequest,
            models::SearchResponse,
            models::SearchResultItem,
            models::SearchMetadata,
            models::PerformanceInfo,
            models::CacheInfo,
            models::DatabaseStats,
            models::DateRange,
            models::SemanticSearchRequest,
            models::SemanticSearchResponse,
            models::SemanticHit,
            models::RagQueryRequest,
            models::RagAnalysisResponse,
            models::RagDocumentSource,
            models::AssessmentRequest,
            models::AssessmentResponse,
            models::Assessment,
            models::ResultBreakdown,
            models::RiskRating,
            models::RiskLabel,
            models::RiskColor,
            models::ClassificationMethod,
            models::Language,
            models::StatusResponse,
        )
    ),
    tags(
        (name = "Authentication", description = "User authentication endpoints"),
        (name = "Search", description = "Company risk search endpoints"),
        (name = "Analysis", description = "RAG analysis and risk assessment"),
        (name = "System", description = "Operational status"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::Http::new(
                        utoipa::openapi::security::HttpAuthScheme::Bearer,
                    ),
                ),
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    // Keep the appender guard alive for the process lifetime
    let mut _log_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("centinela.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _log_guard = Some(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Centinela starting up");
    tracing::info!("Configuration loaded successfully");

    let jwt_util = Arc::new(JwtUtil::new(&config.auth.jwt_secret, &config.auth.jwt_expires_in));

    let warehouse = Arc::new(WarehouseClient::new(
        &config.warehouse.base_url,
        &config.warehouse.project_id,
        &config.warehouse.dataset_id,
    ));

    let write_queue = Arc::new(WriteQueue::new(Arc::clone(&warehouse)));
    let _write_queue_handle =
        write_queue.start(Duration::from_secs(config.warehouse.flush_interval_secs));
    tracing::info!(
        "Write queue worker started (tick: {}s)",
        config.warehouse.flush_interval_secs
    );

    let cache = Arc::new(CacheTier::new(&config.cache, Arc::clone(&warehouse)).await);

    let classifier = Arc::new(HybridClassifier::new(LlmClassifier::new(
        &config.services.classify_url,
        config.services.llm_timeout_secs,
    )));

    let embed_client = Arc::new(EmbedClient::new(
        &config.services.embed_url,
        &config.embedding.embedding_model,
        config.services.embed_timeout_secs,
    ));

    let generate_client = Arc::new(GenerateClient::new(
        &config.services.generate_url,
        config.services.llm_timeout_secs,
    ));

    let vector_store = Arc::new(VectorStore::new(
        Arc::clone(&warehouse),
        &config.services.vector_url,
        config.services.llm_timeout_secs,
    ));

    let adapters = build_adapters(&config.sources, Some(Arc::clone(&generate_client)));
    tracing::info!("{} source adapters configured", adapters.len());
    let orchestrator =
        Arc::new(SearchOrchestrator::new(adapters, config.sources.fetch_timeout_secs));

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&orchestrator),
        Arc::clone(&classifier),
        Arc::clone(&cache),
        Arc::clone(&write_queue),
        Arc::clone(&vector_store),
        Arc::clone(&embed_client),
        config.embedding.clone(),
        &config.sources,
    ));

    let rag_service = Arc::new(RagService::new(
        Arc::clone(&embed_client),
        Arc::clone(&vector_store),
        Arc::clone(&generate_client),
    ));

    let user_service = Arc::new(UserService::new(
        Arc::clone(&warehouse),
        Arc::clone(&write_queue),
        Arc::clone(&jwt_util),
    ));

    // Daily retention vacuum for parsed raw docs
    let vacuum = RetentionVacuum::new(
        Arc::clone(&warehouse),
        config.warehouse.raw_doc_retention_days,
    );
    tokio::spawn(async move {
        ScheduledExecutor::new("raw-doc-retention", Duration::from_secs(24 * 3600))
            .start(vacuum)
            .await;
    });
    tracing::info!(
        "Retention vacuum scheduled (retention: {} days)",
        config.warehouse.raw_doc_retention_days
    );

    let app_state = Arc::new(AppState {
        jwt_util: Arc::clone(&jwt_util),
        warehouse,
        write_queue,
        cache,
        classifier,
        embed_client,
        vector_store,
        pipeline,
        rag_service,
        user_service,
    });

    let auth_state = middleware::AuthState { jwt_util };

    let public_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .with_state(Arc::clone(&app_state));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(handlers::auth::get_me))
        .route("/api/search", post(handlers::search::search))
        .route("/api/semantic-search", post(handlers::semantic::semantic_search))
        .route("/api/nlp/ask", post(handlers::nlp::ask))
        .route("/api/assess", post(handlers::assessment::assess))
        .route("/api/status", get(handlers::system::get_status))
        .with_state(Arc::clone(&app_state))
        .layer(axum_middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    let health_routes = Router::new()
        .route("/health", get(handlers::system::health_check))
        .route("/ready", get(handlers::system::ready_check));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public_routes)
        .merge(protected_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("Centinela is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}
