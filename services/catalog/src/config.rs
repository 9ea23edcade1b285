use crate::model::Source;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Catalog database configuration
    pub database: DatabaseConfig,
    /// Search index configuration
    pub search: SearchConfig,
    /// Change stream (Kafka) configuration
    pub kafka: KafkaConfig,
    /// Query API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Kafka consumer configuration for the catalog change stream
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic carrying catalog change records
    #[serde(default = "default_change_stream_topic")]
    pub change_stream_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
}

/// S3 blob storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket holding processed and original media
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix for every object written by the pipeline
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Search index (OpenSearch) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Search domain endpoint, e.g. https://search-lgtm.ap-northeast-1.es.amazonaws.com
    pub endpoint: String,
    /// Index holding catalog documents
    #[serde(default = "default_index_name")]
    pub index_name: String,
    /// Region used for request signing
    #[serde(default = "default_region")]
    pub region: String,
    /// Sign requests with SigV4 (disable for local clusters)
    #[serde(default = "default_true")]
    pub sign_requests: bool,
    /// Maximum number of hits collected per keyword search
    #[serde(default = "default_max_hits")]
    pub max_hits: usize,
}

/// Configuration for the catalog query API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Allowed CORS origins; the first one is the fallback origin
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Source whose entries this deployment serves for id lookups
    #[serde(default = "default_source")]
    pub source: Source,
    /// Public media base (CDN host or URL) used to build image URLs
    pub public_media_base: String,
    /// Cursor listing page size
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Maximum identifiers fetched in one batch lookup
    #[serde(default = "default_max_batch_ids")]
    pub max_batch_ids: usize,
}

// Default value functions
fn default_service_name() -> String {
    "lgtm-catalog".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_consumer_group() -> String {
    "lgtm-search-sync".to_string()
}

fn default_change_stream_topic() -> String {
    "lgtm.catalog.changes".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_region() -> String {
    "ap-northeast-1".to_string()
}

fn default_namespace() -> String {
    "lgtm".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_index_name() -> String {
    "lgtm-images".to_string()
}

fn default_max_hits() -> usize {
    100
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3001".to_string()]
}

fn default_source() -> Source {
    Source::Giphy
}

fn default_page_size() -> usize {
    12
}

fn default_max_batch_ids() -> usize {
    100
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "lgtm-catalog")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/lgtm/catalog").required(false))
            // CATALOG__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl DatabaseConfig {
    /// Connection acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}
