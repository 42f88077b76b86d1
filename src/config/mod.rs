//! Configuration management for querylens.
//!
//! Configuration is loaded once at process start from defaults, an
//! optional config file, and `QUERYLENS__`-prefixed environment
//! variables, then injected into every component constructor. There is
//! no global settings singleton.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Redis configuration (result cache + job state).
    #[serde(default)]
    pub redis: RedisConfig,
    /// LLM provider configurations.
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Default LLM settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Query pipeline settings.
    #[serde(default)]
    pub query: QueryConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment and config files.
    ///
    /// Sources, in order: defaults, `config/querylens.{yaml,toml,...}` if
    /// present, then `QUERYLENS__`-prefixed environment variables.
    pub fn load() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("llm.max_tokens", 1024)?
            .set_default("llm.temperature", 0.1)?
            .add_source(config::File::with_name("config/querylens").required(false))
            .add_source(
                config::Environment::with_prefix("QUERYLENS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize().unwrap_or_default();

        // Provider API keys come from the conventional variables too
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            app_config.providers.openai.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            app_config.providers.anthropic.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            app_config.providers.ollama.base_url = Some(url);
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            app_config.redis.url = Some(url);
        }

        Ok(app_config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL. When absent the in-memory store is used.
    pub url: Option<String>,
}

/// LLM provider configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// OpenAI configuration.
    #[serde(default)]
    pub openai: ProviderConfig,
    /// Anthropic configuration.
    #[serde(default)]
    pub anthropic: ProviderConfig,
    /// Ollama (local) configuration.
    #[serde(default)]
    pub ollama: ProviderConfig,
}

/// Individual provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Model override for this provider.
    pub model: Option<String>,
}

/// Default LLM settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Active provider: openai | anthropic | ollama.
    #[serde(default)]
    pub provider: crate::llm::ProviderKind,
    /// Maximum tokens for query generation.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature for query generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Conversation history window (turns).
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.1
}

fn default_history_window() -> usize {
    10
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: crate::llm::ProviderKind::default(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            history_window: default_history_window(),
        }
    }
}

/// Query pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Hard execution timeout per query, in seconds. Enforced at the
    /// engine level by each connector, with a client-side outer bound.
    #[serde(default = "default_query_timeout")]
    pub timeout_secs: u64,
    /// Minimum confidence for execution. Equal-to-threshold passes.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Whether the read-only safety gate is enforced.
    #[serde(default = "default_true")]
    pub enforce_read_only: bool,
    /// Result cache TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Connection pool size per data source.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Additional overflow connections beyond the pool size.
    #[serde(default = "default_pool_overflow")]
    pub pool_max_overflow: u32,
    /// Pool acquire wait before giving up, in seconds.
    #[serde(default = "default_acquire_timeout")]
    pub pool_acquire_timeout_secs: u64,
    /// Top-K tables kept by the schema relevance filter.
    #[serde(default = "default_relevance_top_k")]
    pub relevance_top_k: usize,
    /// Embedding model for the relevance filter.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

fn default_query_timeout() -> u64 {
    30
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_pool_size() -> u32 {
    5
}

fn default_pool_overflow() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_relevance_top_k() -> usize {
    5
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_query_timeout(),
            confidence_threshold: default_confidence_threshold(),
            enforce_read_only: true,
            cache_ttl_secs: default_cache_ttl(),
            pool_size: default_pool_size(),
            pool_max_overflow: default_pool_overflow(),
            pool_acquire_timeout_secs: default_acquire_timeout(),
            relevance_top_k: default_relevance_top_k(),
            embedding_model: default_embedding_model(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_contract() {
        let config = QueryConfig::default();
        assert_eq!(config.timeout_secs, 30);
        assert!((config.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.enforce_read_only);
        assert_eq!(config.cache_ttl_secs, 3600);
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.pool_max_overflow, 10);
    }

    #[test]
    fn history_window_is_bounded() {
        assert_eq!(LlmConfig::default().history_window, 10);
    }
}
