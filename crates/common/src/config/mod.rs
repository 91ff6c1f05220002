//! Configuration management for Doc-Talk services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values
//!
//! Provider API keys may also come from the conventional `GROQ_API_KEY` /
//! `OPENAI_API_KEY` variables, usually loaded from a `.env` file.

use crate::chain::CombineStrategy;
use crate::index::DistanceMetric;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Session lifetime and upload storage
    #[serde(default)]
    pub session: SessionConfig,

    /// Document chunking
    #[serde(default)]
    pub chunking: ChunkingSettings,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chat model configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retrieval and answer generation
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Largest accepted document upload
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Idle time after which a session and its index are discarded
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// How often expired sessions are swept
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Directory uploaded documents are written to while a session lives
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

/// Splitting strategy for extracted document text
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Split on a separator and merge pieces up to the chunk size
    #[default]
    Character,
    /// Split at the highest semantic level (paragraph, sentence, word) that fits
    Semantic,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingSettings {
    #[serde(default)]
    pub strategy: ChunkStrategy,

    /// Separator used by the character strategy
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Treat the separator as a regular expression
    #[serde(default)]
    pub separator_is_regex: bool,

    /// Maximum chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between neighbouring chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: tei, openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Chat provider: groq, openai, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key, falls back to the provider's conventional env var
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,

    /// Maximum output tokens per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries on transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Chunks retrieved per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Distance used by the vector index
    #[serde(default)]
    pub metric: DistanceMetric,

    /// Drop retrieved chunks with a lower relevance
    pub score_threshold: Option<f32>,

    /// How retrieved chunks are combined into an answer
    #[serde(default)]
    pub chain_type: CombineStrategy,

    /// Answer with the standalone question rather than the raw follow-up
    #[serde(default = "default_true")]
    pub rephrase_question: bool,

    /// Token budget for the map-reduce combine step
    #[serde(default = "default_token_max")]
    pub token_max: usize,

    /// Fixed answer when nothing was retrieved (skips the LLM)
    pub response_if_no_docs_found: Option<String>,

    /// Log every prompt at info level
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 120 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_upload_bytes() -> usize { 200 * 1024 * 1024 }
fn default_session_ttl() -> u64 { 1800 }
fn default_reap_interval() -> u64 { 60 }
fn default_upload_dir() -> PathBuf { PathBuf::from("uploads") }
fn default_separator() -> String { "\n".to_string() }
fn default_chunk_size() -> usize { 1000 }
fn default_chunk_overlap() -> usize { 200 }
fn default_embedding_provider() -> String { "tei".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_max_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 32 }
fn default_llm_provider() -> String { "groq".to_string() }
fn default_llm_model() -> String { crate::DEFAULT_CHAT_MODEL.to_string() }
fn default_max_tokens() -> usize { 1024 }
fn default_llm_timeout() -> u64 { 60 }
fn default_top_k() -> usize { 4 }
fn default_true() -> bool { true }
fn default_token_max() -> usize { 4000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "doctalk".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__LLM__MODEL=llama-3.1-8b-instant
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific config file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

impl LlmConfig {
    /// Configured key, or the provider's conventional environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        let var = match self.provider.as_str() {
            "groq" => "GROQ_API_KEY",
            "openai" => "OPENAI_API_KEY",
            _ => return None,
        };
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            reap_interval_secs: default_reap_interval(),
            upload_dir: default_upload_dir(),
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::default(),
            separator: default_separator(),
            separator_is_regex: false,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            metric: DistanceMetric::default(),
            score_threshold: None,
            chain_type: CombineStrategy::default(),
            rephrase_question: true,
            token_max: default_token_max(),
            response_if_no_docs_found: None,
            verbose: false,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.llm.model, "llama-3.1-70b-versatile");
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.retrieval.chain_type, CombineStrategy::MapReduce);
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[llm]\nprovider = \"mock\"\ntemperature = 0.3\n\n[retrieval]\nchain_type = \"stuff\"\nmetric = \"cosine\"\n\n[chunking]\nstrategy = \"semantic\""
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = AppConfig::from_file(&path).unwrap();

        assert_eq!(config.llm.provider, "mock");
        assert!((config.llm.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.llm.model, "llama-3.1-70b-versatile");
        assert_eq!(config.retrieval.chain_type, CombineStrategy::Stuff);
        assert_eq!(config.retrieval.metric, DistanceMetric::Cosine);
        assert_eq!(config.chunking.strategy, ChunkStrategy::Semantic);
        assert_eq!(config.session.ttl_secs, 1800);
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = LlmConfig {
            api_key: Some("gsk_test".to_string()),
            ..LlmConfig::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("gsk_test"));
    }

    #[test]
    fn test_mock_provider_needs_no_key() {
        let config = LlmConfig {
            provider: "mock".to_string(),
            ..LlmConfig::default()
        };
        assert!(config.resolve_api_key().is_none());
    }
}
