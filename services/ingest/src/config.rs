//! Configuration management for the ingest job.
//!
//! Loaded from optional config files and `INGEST__*` environment variables.
//! Presentation constants (caption text, fonts, canvas sizes) are not
//! configurable and live in the annotation modules.

use config::{Config, ConfigError, Environment, File};
use lgtm_catalog::config::{DatabaseConfig, S3Config};
use lgtm_catalog::Source;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the ingest job.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Catalog database (dedup lookups and catalog writes)
    pub database: DatabaseConfig,

    /// Blob storage for processed and original media
    pub s3: S3Config,

    /// Label detection configuration
    #[serde(default)]
    pub recognition: RecognitionConfig,

    /// Image search provider configuration
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Pipeline run configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Label detection (Rekognition) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    /// AWS region of the recognition service
    #[serde(default = "default_region")]
    pub region: String,
}

/// Image search provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub unsplash: UnsplashConfig,

    #[serde(default)]
    pub giphy: GiphyConfig,

    /// Maximum provider pages fetched per keyword
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// HTTP request timeout in seconds; unset leaves timing to the host
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsplashConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_unsplash_base_url")]
    pub base_url: String,

    /// Results per page (the API caps this at 100)
    #[serde(default = "default_unsplash_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GiphyConfig {
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_giphy_base_url")]
    pub base_url: String,

    /// Results per page for search mode
    #[serde(default = "default_giphy_limit")]
    pub limit: u32,

    /// Content rating filter for search mode
    #[serde(default = "default_giphy_rating")]
    pub rating: String,

    #[serde(default)]
    pub mode: GiphyMode,
}

/// Which Giphy endpoint candidates come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiphyMode {
    /// Paged keyword search, newest first
    #[default]
    Search,
    /// One random GIF tagged with the keyword
    Random,
}

/// Pipeline run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Provider searched by this run
    #[serde(default = "default_source")]
    pub source: Source,

    /// Keywords searched when none are given on the command line
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Keyword runs executed concurrently
    #[serde(default = "default_keyword_concurrency")]
    pub keyword_concurrency: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_region() -> String {
    "ap-northeast-1".to_string()
}
fn default_max_pages() -> u32 {
    1
}
fn default_unsplash_base_url() -> String {
    "https://api.unsplash.com".to_string()
}
fn default_unsplash_per_page() -> u32 {
    100
}
fn default_giphy_base_url() -> String {
    "https://api.giphy.com".to_string()
}
fn default_giphy_limit() -> u32 {
    50
}
fn default_giphy_rating() -> String {
    "g".to_string()
}
fn default_source() -> Source {
    Source::Giphy
}
fn default_keyword_concurrency() -> usize {
    4
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            unsplash: UnsplashConfig::default(),
            giphy: GiphyConfig::default(),
            max_pages: default_max_pages(),
            request_timeout_secs: None,
        }
    }
}

impl Default for UnsplashConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_unsplash_base_url(),
            per_page: default_unsplash_per_page(),
        }
    }
}

impl Default for GiphyConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_giphy_base_url(),
            limit: default_giphy_limit(),
            rating: default_giphy_rating(),
            mode: GiphyMode::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            keywords: Vec::new(),
            keyword_concurrency: default_keyword_concurrency(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Later sources override earlier ones:
    /// 1. `config/ingest.*`
    /// 2. `/etc/lgtm/ingest.*`
    /// 3. Environment variables (e.g. `INGEST__SOURCES__GIPHY__API_KEY`)
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/ingest").required(false))
            .add_source(File::with_name("/etc/lgtm/ingest").required(false))
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("pipeline.keywords")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingField("database.url".to_string()));
        }

        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }

        let api_key = match self.pipeline.source {
            Source::Unsplash => ("sources.unsplash.api_key", &self.sources.unsplash.api_key),
            Source::Giphy => ("sources.giphy.api_key", &self.sources.giphy.api_key),
        };
        if api_key.1.is_empty() {
            return Err(ConfigValidationError::MissingField(api_key.0.to_string()));
        }

        if self.sources.unsplash.per_page == 0 || self.sources.unsplash.per_page > 100 {
            return Err(ConfigValidationError::InvalidValue {
                field: "sources.unsplash.per_page".to_string(),
                message: "must be between 1 and 100".to_string(),
            });
        }

        if self.sources.giphy.limit == 0 || self.sources.giphy.limit > 50 {
            return Err(ConfigValidationError::InvalidValue {
                field: "sources.giphy.limit".to_string(),
                message: "must be between 1 and 50".to_string(),
            });
        }

        if self.sources.max_pages == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "sources.max_pages".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.pipeline.keyword_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "pipeline.keyword_concurrency".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl SourcesConfig {
    /// Get request timeout as Duration.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
