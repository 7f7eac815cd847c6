//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub vector_index: VectorIndexConfig,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub corpus: CorpusConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings. Run once at startup, before wiring providers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_embedding()?;
        self.validate_retrieval()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if server.request_deadline_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.request_deadline_ms".to_string(),
                message: "Request deadline must be at least 1ms".to_string(),
            });
        }

        let rate_limit = &server.rate_limit;
        if rate_limit.enabled {
            if rate_limit.bucket_size == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "server.rate_limit.bucket_size".to_string(),
                    message: "Must be at least 1 when rate limiting is enabled".to_string(),
                });
            }
            if rate_limit.refill_per_sec <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "server.rate_limit.refill_per_sec".to_string(),
                    message: format!("Must be positive, got {}", rate_limit.refill_per_sec),
                });
            }
        }

        if self.environment.is_production()
            && server.cors_enabled
            && server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured. \
                 This may block legitimate requests."
            );
        }

        Ok(())
    }

    fn validate_embedding(&self) -> Result<(), ConfigError> {
        let embedding = &self.embedding;

        if embedding.dimension == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.dimension".to_string(),
                message: "Dimension must be at least 1".to_string(),
            });
        }

        if embedding.cache_ttl_secs < 3600 {
            tracing::warn!(
                ttl = embedding.cache_ttl_secs,
                "embedding cache TTL below one hour; cached vectors will churn"
            );
        }

        if embedding.backend == EmbeddingBackend::Gemini && embedding.api_key.is_none() {
            if self.environment.is_strict() {
                return Err(ConfigError::MissingField(
                    "embedding.api_key (required for the gemini backend)".to_string(),
                ));
            }
            tracing::warn!("gemini embedding backend selected without an API key");
        }

        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;

        for (field, value) in [
            ("retrieval.confidence_floor", retrieval.confidence_floor),
            ("retrieval.strong_fused_threshold", retrieval.strong_fused_threshold),
            ("retrieval.composite_floor", retrieval.composite_floor),
            ("retrieval.degraded_confidence_cap", retrieval.degraded_confidence_cap),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be between 0.0 and 1.0, got {value}"),
                });
            }
        }

        if retrieval.overfetch_factor == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.overfetch_factor".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request deadline; sub-retrievals inherit it.
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Token bucket guarding outbound provider calls.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_deadline_ms() -> u64 {
    10_000
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_deadline_ms: default_request_deadline_ms(),
            cors_enabled: default_true(),
            // Empty by default - must be explicitly configured for production
            cors_origins: Vec::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Token bucket configuration for outbound provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bucket capacity (burst size).
    #[serde(default = "default_bucket_size")]
    pub bucket_size: u32,

    /// Sustained tokens per second.
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,

    /// Queued acquisitions beyond this fail fast with `rate_limited`.
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,
}

fn default_bucket_size() -> u32 {
    20
}
fn default_refill_per_sec() -> f64 {
    10.0
}
fn default_max_backlog() -> usize {
    64
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket_size: default_bucket_size(),
            refill_per_sec: default_refill_per_sec(),
            max_backlog: default_max_backlog(),
        }
    }
}

/// Embedding provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Hosted `embedContent` API.
    Gemini,
    /// Deterministic offline hashed features (no network).
    #[default]
    Hashed,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Fixed at corpus build time; changing it requires a full re-embed.
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    #[serde(default = "default_task_type")]
    pub task_type: String,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_embedding_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}
fn default_embedding_dimension() -> usize {
    768
}
fn default_task_type() -> String {
    "retrieval_document".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            api_key: None,
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            task_type: default_task_type(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Qdrant,
    #[default]
    Memory,
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexConfig {
    #[serde(default)]
    pub backend: VectorBackend,

    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_qdrant_endpoint() -> String {
    "http://localhost:6334".to_string()
}
fn default_collection() -> String {
    "incidents".to_string()
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::default(),
            endpoint: default_qdrant_endpoint(),
            collection: default_collection(),
            api_key: None,
        }
    }
}

/// Generative provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    Http,
    /// Deterministic canned answers; no network.
    #[default]
    Scripted,
}

/// Generative provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub backend: GeneratorBackend,

    #[serde(default = "default_generator_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_generator_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Kept low so generation stays deterministic for a fixed corpus.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_generator_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_generator_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_generator_model() -> String {
    "qwen2.5:7b-instruct-q4_K_M".to_string()
}
fn default_max_tokens() -> usize {
    512
}
fn default_temperature() -> f32 {
    0.1
}
fn default_generator_timeout_secs() -> u64 {
    30
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::default(),
            endpoint: default_generator_endpoint(),
            api_key: None,
            model: default_generator_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generator_timeout_secs(),
        }
    }
}

/// Retrieval sizing and validation thresholds.
///
/// Fusion weights and boost multipliers are compiled constants; only sizing
/// knobs live here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default admission floor the router assigns to non-exact queries; a
    /// request's `confidence_threshold` overrides it per call.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,

    /// Fused score at which a candidate set is admitted regardless of the
    /// composite signal.
    #[serde(default = "default_strong_fused")]
    pub strong_fused_threshold: f32,

    /// Composite relevance at which a candidate set is admitted.
    #[serde(default = "default_composite_floor")]
    pub composite_floor: f32,

    /// Confidence ceiling when one retrieval path is down.
    #[serde(default = "default_degraded_cap")]
    pub degraded_confidence_cap: f32,

    /// Each sub-search asks for `overfetch_factor * top_k` items.
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,
}

fn default_confidence_floor() -> f32 {
    0.3
}
fn default_strong_fused() -> f32 {
    0.8
}
fn default_composite_floor() -> f32 {
    0.3
}
fn default_degraded_cap() -> f32 {
    0.6
}
fn default_overfetch() -> usize {
    2
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            strong_fused_threshold: default_strong_fused(),
            composite_floor: default_composite_floor(),
            degraded_confidence_cap: default_degraded_cap(),
            overfetch_factor: default_overfetch(),
        }
    }
}

/// Corpus bootstrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorpusConfig {
    /// Path to a JSON incident export loaded at startup.
    #[serde(default)]
    pub seed_path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`INCIDENT_INTEL` prefix, `__` separator)
/// 2. `config/{env}` (if env specified)
/// 3. `config/default`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("INCIDENT_INTEL")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
