use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub warehouse: WarehouseConfig,
    pub services: CloudServicesConfig,
    pub sources: SourcesConfig,
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Columnar warehouse (store of record) connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Base URL of the warehouse REST endpoint
    pub base_url: String,
    pub project_id: String,
    pub dataset_id: String,
    /// Write-queue worker tick in seconds (default: 5)
    pub flush_interval_secs: u64,
    /// Retention for parsed raw docs in days (default: 90)
    pub raw_doc_retention_days: i64,
}

/// Remote cloud services consumed by the pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudServicesConfig {
    pub embed_url: String,
    pub classify_url: String,
    pub generate_url: String,
    /// Remote vector search service; empty disables the backend
    pub vector_url: String,
    /// Deadline for LLM classify/generate calls in seconds (default: 30)
    pub llm_timeout_secs: u64,
    /// Deadline for embed calls in seconds (default: 30)
    pub embed_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// News provider API key; empty disables the NewsAPI adapter
    pub newsapi_key: String,
    pub newsapi_base_url: String,
    pub boe_base_url: String,
    pub finance_base_url: String,
    /// Deadline for a single source fetch in seconds (default: 10)
    pub fetch_timeout_secs: u64,
    /// Default lookback window when the caller gives no dates (default: 7)
    pub default_days_back: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// L1 in-process cache capacity (default: 1000 entries)
    pub l1_capacity: usize,
    /// L1 TTL in seconds (default: 300)
    pub l1_ttl_secs: u64,
    /// Redis URL for the L2 tier; empty disables L2
    pub redis_url: String,
    /// L2 TTL in seconds (default: 3600)
    pub l2_ttl_secs: u64,
    /// L3 warehouse lookback in hours (default: 24)
    pub cache_age_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    /// Cap on documents embedded per search (default: 10)
    pub max_documents_to_embed: usize,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expires_in: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "centinela")]
#[command(version, about = "Centinela - D&O Risk Intelligence Platform")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Warehouse REST base URL (overrides config file)
    #[arg(long, value_name = "URL")]
    pub warehouse_url: Option<String>,

    /// Warehouse project ID (overrides config file)
    #[arg(long, value_name = "PROJECT")]
    pub warehouse_project: Option<String>,

    /// Warehouse dataset ID (overrides config file)
    #[arg(long, value_name = "DATASET")]
    pub warehouse_dataset: Option<String>,

    /// JWT secret key (overrides config file)
    #[arg(long, value_name = "SECRET")]
    pub jwt_secret: Option<String>,

    /// Logging level (overrides config file, e.g., "info,centinela=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// News provider API key (overrides config file)
    #[arg(long, value_name = "KEY")]
    pub newsapi_key: Option<String>,

    /// Enable/disable vector embedding of classified events
    #[arg(long, value_name = "BOOL")]
    pub embedding_enabled: Option<bool>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        // 1. Load from config file (use CLI --config if provided, otherwise find default)
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        // 2. Override with environment variables
        config.apply_env_overrides();

        // 3. Override with command line arguments (highest priority)
        config.apply_cli_overrides(cli_args);

        // 4. Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_WAREHOUSE_URL / APP_WAREHOUSE_PROJECT / APP_WAREHOUSE_DATASET
    /// - APP_EMBED_URL / APP_CLASSIFY_URL / APP_GENERATE_URL / APP_VECTOR_URL
    /// - APP_NEWSAPI_KEY
    /// - APP_REDIS_URL
    /// - APP_JWT_SECRET / APP_JWT_EXPIRES_IN
    /// - APP_LOG_LEVEL
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(url) = std::env::var("APP_WAREHOUSE_URL") {
            self.warehouse.base_url = url;
            tracing::info!("Override warehouse.base_url from env");
        }

        if let Ok(project) = std::env::var("APP_WAREHOUSE_PROJECT") {
            self.warehouse.project_id = project;
            tracing::info!("Override warehouse.project_id from env: {}", self.warehouse.project_id);
        }

        if let Ok(dataset) = std::env::var("APP_WAREHOUSE_DATASET") {
            self.warehouse.dataset_id = dataset;
            tracing::info!("Override warehouse.dataset_id from env: {}", self.warehouse.dataset_id);
        }

        if let Ok(url) = std::env::var("APP_EMBED_URL") {
            self.services.embed_url = url;
        }
        if let Ok(url) = std::env::var("APP_CLASSIFY_URL") {
            self.services.classify_url = url;
        }
        if let Ok(url) = std::env::var("APP_GENERATE_URL") {
            self.services.generate_url = url;
        }
        if let Ok(url) = std::env::var("APP_VECTOR_URL") {
            self.services.vector_url = url;
        }

        if let Ok(key) = std::env::var("APP_NEWSAPI_KEY") {
            self.sources.newsapi_key = key;
            tracing::info!("Override sources.newsapi_key from env");
        }

        if let Ok(url) = std::env::var("APP_REDIS_URL") {
            self.cache.redis_url = url;
            tracing::info!("Override cache.redis_url from env");
        }

        if let Ok(secret) = std::env::var("APP_JWT_SECRET") {
            self.auth.jwt_secret = secret;
            tracing::info!("Override auth.jwt_secret from env");
        }

        if let Ok(expires) = std::env::var("APP_JWT_EXPIRES_IN") {
            self.auth.jwt_expires_in = expires;
            tracing::info!("Override auth.jwt_expires_in from env: {}", self.auth.jwt_expires_in);
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(url) = &args.warehouse_url {
            self.warehouse.base_url = url.clone();
            tracing::info!("Override warehouse.base_url from CLI");
        }

        if let Some(project) = &args.warehouse_project {
            self.warehouse.project_id = project.clone();
        }

        if let Some(dataset) = &args.warehouse_dataset {
            self.warehouse.dataset_id = dataset.clone();
        }

        if let Some(secret) = &args.jwt_secret {
            self.auth.jwt_secret = secret.clone();
            tracing::info!("Override auth.jwt_secret from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if let Some(key) = &args.newsapi_key {
            self.sources.newsapi_key = key.clone();
            tracing::info!("Override sources.newsapi_key from CLI");
        }

        if let Some(enabled) = args.embedding_enabled {
            self.embedding.enabled = enabled;
            tracing::info!("Override embedding.enabled from CLI: {}", self.embedding.enabled);
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        // Warn if using default JWT secret in production
        if self.auth.jwt_secret == "dev-secret-key-change-in-production" {
            tracing::warn!("⚠️  WARNING: Using default JWT secret!");
            tracing::warn!(
                "⚠️  Please set APP_JWT_SECRET environment variable or update config.toml"
            );
            tracing::warn!("⚠️  This is INSECURE for production use!");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.warehouse.base_url.is_empty() {
            anyhow::bail!("Warehouse base URL cannot be empty");
        }
        if self.warehouse.project_id.is_empty() || self.warehouse.dataset_id.is_empty() {
            anyhow::bail!("Warehouse project_id and dataset_id must be set");
        }

        if self.warehouse.flush_interval_secs == 0 {
            anyhow::bail!("warehouse.flush_interval_secs must be > 0");
        }

        if self.sources.default_days_back < 1 {
            anyhow::bail!("sources.default_days_back must be >= 1");
        }

        if self.cache.l1_capacity == 0 {
            anyhow::bail!("cache.l1_capacity must be > 0");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9050".to_string(),
            project_id: "centinela-dev".to_string(),
            dataset_id: "risk_dataset".to_string(),
            flush_interval_secs: 5,
            raw_doc_retention_days: 90,
        }
    }
}

impl Default for CloudServicesConfig {
    fn default() -> Self {
        Self {
            embed_url: "http://localhost:8001".to_string(),
            classify_url: "http://localhost:8002".to_string(),
            generate_url: "http://localhost:8003".to_string(),
            vector_url: String::new(),
            llm_timeout_secs: 30,
            embed_timeout_secs: 30,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            newsapi_key: String::new(),
            newsapi_base_url: "https://newsapi.org/v2".to_string(),
            boe_base_url: "https://www.boe.es".to_string(),
            finance_base_url: "https://query1.finance.yahoo.com".to_string(),
            fetch_timeout_secs: 10,
            default_days_back: 7,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 1000,
            l1_ttl_secs: 300,
            redis_url: String::new(),
            l2_ttl_secs: 3600,
            cache_age_hours: 24,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_documents_to_embed: 10,
            embedding_model: "text-embedding-004".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-key-change-in-production".to_string(),
            jwt_expires_in: "24h".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,centinela=debug".to_string(),
            file: Some("logs/centinela.log".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.warehouse.flush_interval_secs, 5);
        assert_eq!(config.cache.l1_capacity, 1000);
        assert_eq!(config.sources.default_days_back, 7);
    }

    #[test]
    fn toml_sections_are_optional() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9090

            [cache]
            cache_age_hours = 48
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.cache.cache_age_hours, 48);
        // Untouched sections keep their defaults
        assert_eq!(config.embedding.max_documents_to_embed, 10);
    }
}
