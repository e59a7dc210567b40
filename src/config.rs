//! Application configuration
//!
//! Defaults match a local development setup. `AppConfig::from_env` layers
//! environment variables (after `.env` is loaded) over the defaults;
//! `AppConfig::load` reads a JSON file with the same shape.

use crate::error::{CareQueryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Seconds allowed for one ping or validation query
    pub timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8123,
            database: "docnexus".to_string(),
            username: "default".to_string(),
            password: "mysecret".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: 0.2,
            max_output_tokens: 500,
            top_p: 0.8,
            top_k: 40,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub num_predict: u32,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            temperature: 0.3,
            num_predict: 300,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub primary: GeminiConfig,
    pub fallback: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub enabled: bool,
    /// Remote embeddings are used only when a key is present
    pub embedding_api_key: Option<String>,
    pub embedding_base_url: String,
    pub embedding_model: String,
    /// Vector length returned by the embedding model
    pub embedding_dimensions: usize,
    /// Dimension of the local hashing embedder
    pub hashing_dimensions: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            embedding_api_key: None,
            embedding_base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            hashing_dimensions: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub max_hyde_examples: usize,
    pub max_context_documents: usize,
    pub max_query_length: usize,
    pub query_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_hyde_examples: 3,
            max_context_documents: 5,
            max_query_length: 500,
            query_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub csv_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            csv_path: PathBuf::from("evaluation.csv"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Reads a JSON configuration file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CareQueryError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.max_query_length == 0 {
            return Err(CareQueryError::Config(
                "processing.max_query_length must be positive".to_string(),
            ));
        }
        if self.database.host.trim().is_empty() {
            return Err(CareQueryError::Config("database.host is empty".to_string()));
        }
        Ok(())
    }

    /// Applies overrides from any key lookup; separated from `from_env` for tests
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("CLICKHOUSE_HOST") {
            self.database.host = v;
        }
        self.database.port = parse_or(non_empty("CLICKHOUSE_PORT"), "CLICKHOUSE_PORT", self.database.port);
        if let Some(v) = non_empty("CLICKHOUSE_DATABASE") {
            self.database.database = v;
        }
        if let Some(v) = non_empty("CLICKHOUSE_USERNAME") {
            self.database.username = v;
        }
        if let Some(v) = lookup("CLICKHOUSE_PASSWORD") {
            self.database.password = v;
        }
        self.database.timeout_secs = parse_or(
            non_empty("CLICKHOUSE_TIMEOUT"),
            "CLICKHOUSE_TIMEOUT",
            self.database.timeout_secs,
        );

        if let Some(v) = non_empty("GOOGLE_API_KEY").or_else(|| non_empty("GEMINI_API_KEY")) {
            self.llm.primary.api_key = Some(v);
        }
        if let Some(v) = non_empty("GEMINI_MODEL") {
            self.llm.primary.model = v;
        }
        if let Some(v) = non_empty("OLLAMA_BASE_URL") {
            self.llm.fallback.base_url = v;
        }
        if let Some(v) = non_empty("OLLAMA_MODEL") {
            self.llm.fallback.model = v;
        }
        self.llm.fallback.enabled =
            parse_or(non_empty("OLLAMA_ENABLED"), "OLLAMA_ENABLED", self.llm.fallback.enabled);
        let llm_timeout = parse_or(
            non_empty("LLM_TIMEOUT"),
            "LLM_TIMEOUT",
            self.llm.primary.timeout_secs,
        );
        self.llm.primary.timeout_secs = llm_timeout;
        self.llm.fallback.timeout_secs = llm_timeout;

        if let Some(v) = non_empty("EMBEDDING_API_KEY") {
            self.retrieval.embedding_api_key = Some(v);
        }
        if let Some(v) = non_empty("EMBEDDING_BASE_URL") {
            self.retrieval.embedding_base_url = v;
        }
        if let Some(v) = non_empty("EMBEDDING_MODEL") {
            self.retrieval.embedding_model = v;
        }
        self.retrieval.embedding_dimensions = parse_or(
            non_empty("EMBEDDING_DIMENSIONS"),
            "EMBEDDING_DIMENSIONS",
            self.retrieval.embedding_dimensions,
        );

        self.processing.max_hyde_examples = parse_or(
            non_empty("MAX_HYDE_EXAMPLES"),
            "MAX_HYDE_EXAMPLES",
            self.processing.max_hyde_examples,
        );
        self.processing.max_context_documents = parse_or(
            non_empty("MAX_CONTEXT_DOCUMENTS"),
            "MAX_CONTEXT_DOCUMENTS",
            self.processing.max_context_documents,
        );
        self.processing.max_query_length = parse_or(
            non_empty("MAX_QUERY_LENGTH"),
            "MAX_QUERY_LENGTH",
            self.processing.max_query_length,
        );
        self.processing.query_timeout_secs = parse_or(
            non_empty("QUERY_TIMEOUT"),
            "QUERY_TIMEOUT",
            self.processing.query_timeout_secs,
        );

        if let Some(v) = non_empty("QUERY_LOG_PATH") {
            self.logging.csv_path = PathBuf::from(v);
        }
        self.logging.enabled =
            parse_or(non_empty("QUERY_LOG_ENABLED"), "QUERY_LOG_ENABLED", self.logging.enabled);
    }
}

fn parse_or<T: FromStr + Copy>(value: Option<String>, key: &str, default: T) -> T {
    match value {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value '{}' for {}, keeping default", raw, key);
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.port, 8123);
        assert_eq!(config.database.database, "docnexus");
        assert_eq!(config.processing.max_hyde_examples, 3);
        assert_eq!(config.processing.max_context_documents, 5);
        assert_eq!(config.processing.max_query_length, 500);
        assert_eq!(config.logging.csv_path, PathBuf::from("evaluation.csv"));
        assert!(config.llm.primary.api_key.is_none());
        assert_eq!(config.retrieval.embedding_dimensions, 1536);
    }

    #[test]
    fn test_env_overrides_and_invalid_numbers() {
        let vars: HashMap<&str, &str> = [
            ("CLICKHOUSE_HOST", "ch.internal"),
            ("CLICKHOUSE_PORT", "not-a-port"),
            ("GOOGLE_API_KEY", "abc"),
            ("MAX_QUERY_LENGTH", "200"),
            ("OLLAMA_ENABLED", "false"),
            ("EMBEDDING_DIMENSIONS", "768"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.host, "ch.internal");
        assert_eq!(config.database.port, 8123);
        assert_eq!(config.llm.primary.api_key.as_deref(), Some("abc"));
        assert_eq!(config.processing.max_query_length, 200);
        assert!(!config.llm.fallback.enabled);
        assert_eq!(config.retrieval.embedding_dimensions, 768);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"database": {"host": "db"}, "processing": {"max_query_length": 100}}"#)
                .unwrap();
        assert_eq!(config.database.host, "db");
        assert_eq!(config.database.port, 8123);
        assert_eq!(config.processing.max_query_length, 100);
        assert_eq!(config.processing.max_hyde_examples, 3);
    }
}
