//! Configuration for all dbdiag components.
//!
//! Loaded once from a YAML file at startup and passed explicitly into every
//! component constructor. There is no ambient/global configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// LLM chat service configuration (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL, e.g. `https://api.example.com/v1`
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-call timeout in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Embedding service configuration (OpenAI-compatible API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    /// Fixed embedding dimension D agreed at build time.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Texts per embedding request during index build.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Exponential-backoff retry policy for upstream calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Tunables for the online diagnosis engine and offline index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cosine threshold for greedy clustering during index build.
    #[serde(default = "default_cluster_threshold")]
    pub cluster_similarity_threshold: f32,
    /// Phenomena retrieved per tracker run.
    #[serde(default = "default_retrieve_top_k")]
    pub retrieve_top_k: usize,
    /// Vector-stage candidate pool before keyword filtering.
    #[serde(default = "default_vector_candidates")]
    pub vector_candidates: usize,
    /// Hypotheses kept per turn (K).
    #[serde(default = "default_hypothesis_top_k")]
    pub hypothesis_top_k: usize,
    /// Phenomena recommended per turn (N).
    #[serde(default = "default_recommend_count")]
    pub recommend_count: usize,
    /// Confidence at which the engine terminates with a diagnosis.
    #[serde(default = "default_diagnosis_threshold")]
    pub diagnosis_threshold: f64,
    /// Confidence for forced termination when nothing is left to ask.
    #[serde(default = "default_moderate_threshold")]
    pub moderate_threshold: f64,
    /// Confidence penalty per denied relevant phenomenon.
    #[serde(default = "default_denial_penalty")]
    pub denial_penalty: f64,
    /// Similar tickets fetched on the first Hyb turn.
    #[serde(default = "default_ticket_search_top_k")]
    pub ticket_search_top_k: usize,
    /// Similar tickets fetched on mid-dialogue Hyb expansion.
    #[serde(default = "default_midturn_ticket_search_top_k")]
    pub midturn_ticket_search_top_k: usize,
    /// Overall budget for one turn, in seconds.
    #[serde(default = "default_turn_budget_secs")]
    pub turn_budget_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cluster_similarity_threshold: default_cluster_threshold(),
            retrieve_top_k: default_retrieve_top_k(),
            vector_candidates: default_vector_candidates(),
            hypothesis_top_k: default_hypothesis_top_k(),
            recommend_count: default_recommend_count(),
            diagnosis_threshold: default_diagnosis_threshold(),
            moderate_threshold: default_moderate_threshold(),
            denial_penalty: default_denial_penalty(),
            ticket_search_top_k: default_ticket_search_top_k(),
            midturn_ticket_search_top_k: default_midturn_ticket_search_top_k(),
            turn_budget_secs: default_turn_budget_secs(),
        }
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| Error::config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that would otherwise fail deep inside a turn.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(Error::config("llm.api_base must not be empty"));
        }
        if self.embedding.api_base.is_empty() {
            return Err(Error::config("embedding.api_base must not be empty"));
        }
        if self.embedding.dimension == 0 {
            return Err(Error::config("embedding.dimension must be positive"));
        }
        let t = self.engine.cluster_similarity_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(Error::config(
                "engine.cluster_similarity_threshold must be within [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.engine.diagnosis_threshold) {
            return Err(Error::config(
                "engine.diagnosis_threshold must be within [0, 1]",
            ));
        }
        if self.engine.moderate_threshold > self.engine.diagnosis_threshold {
            return Err(Error::config(
                "engine.moderate_threshold must not exceed engine.diagnosis_threshold",
            ));
        }
        if self.engine.hypothesis_top_k == 0 {
            return Err(Error::config("engine.hypothesis_top_k must be at least 1"));
        }
        Ok(())
    }
}

fn default_temperature() -> f64 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_dimension() -> usize {
    1024
}
fn default_batch_size() -> usize {
    16
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/dbdiag.db")
}
fn default_cluster_threshold() -> f32 {
    0.85
}
fn default_retrieve_top_k() -> usize {
    20
}
fn default_vector_candidates() -> usize {
    50
}
fn default_hypothesis_top_k() -> usize {
    3
}
fn default_recommend_count() -> usize {
    3
}
fn default_diagnosis_threshold() -> f64 {
    0.80
}
fn default_moderate_threshold() -> f64 {
    0.50
}
fn default_denial_penalty() -> f64 {
    0.15
}
fn default_ticket_search_top_k() -> usize {
    5
}
fn default_midturn_ticket_search_top_k() -> usize {
    3
}
fn default_turn_budget_secs() -> u64 {
    120
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
llm:
  api_base: "http://localhost:9000/v1"
  api_key: "test-key"
  model: "test-model"
embedding:
  api_base: "http://localhost:9001/v1"
  api_key: "test-key"
  model: "test-embed"
"#
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.engine.cluster_similarity_threshold, 0.85);
        assert_eq!(config.engine.diagnosis_threshold, 0.80);
        assert_eq!(config.engine.moderate_threshold, 0.50);
        assert_eq!(config.engine.hypothesis_top_k, 3);
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.llm.retry.max_attempts, 3);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_threshold_ordering_rejected() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.engine.moderate_threshold = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file("/nonexistent/dbdiag.yaml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
