use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SibylError};

/// Top-level configuration for the Sibyl service.
///
/// Loaded from a TOML file; secrets may be supplied or overridden through
/// environment variables (`SIBYL_LLM_API_KEY`, `SIBYL_EMBEDDING_API_KEY`,
/// `SIBYL_SEARCH_API_KEY`). Collaborator credentials are validated once at
/// startup so a missing key fails the process, not the first request.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SibylConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl SibylConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SibylConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or unparseable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SibylError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Fill secret fields from environment variables when present.
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_env("SIBYL_LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(key) = non_empty_env("SIBYL_EMBEDDING_API_KEY") {
            self.embedding.api_key = key;
        }
        if let Some(key) = non_empty_env("SIBYL_SEARCH_API_KEY") {
            self.search.api_key = key;
        }
    }

    /// Validate that every collaborator has the credentials it needs.
    ///
    /// Called once at startup; returns the first missing credential.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(SibylError::Config(
                "llm.api_key is required (or set SIBYL_LLM_API_KEY)".to_string(),
            ));
        }
        if self.embedding.api_key.trim().is_empty() {
            return Err(SibylError::Config(
                "embedding.api_key is required (or set SIBYL_EMBEDDING_API_KEY)".to_string(),
            ));
        }
        if self.search.api_key.trim().is_empty() {
            return Err(SibylError::Config(
                "search.api_key is required (or set SIBYL_SEARCH_API_KEY)".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(SibylError::Config(
                "retrieval.top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// General server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Bind address for the HTTP server.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_level: "info".to_string(),
        }
    }
}

/// Completion collaborator settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat completions endpoint URL.
    pub api_url: String,
    /// Bearer token for the completion service.
    pub api_key: String,
    /// Model used for final answer generation.
    pub chat_model: String,
    /// Cheaper model used for rephrasing and search-query synthesis.
    pub utility_model: String,
    /// Sampling temperature for answer generation.
    pub temperature: f32,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            chat_model: "gpt-4".to_string(),
            utility_model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout_ms: 60_000,
        }
    }
}

/// Embedding collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embeddings endpoint URL.
    pub api_url: String,
    /// Bearer token for the embedding service.
    pub api_key: String,
    /// Embedding model name.
    pub model: String,
    /// Expected vector dimensionality.
    pub dimensions: usize,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/embeddings".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout_ms: 30_000,
        }
    }
}

/// Web-search provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search endpoint URL.
    pub api_url: String,
    /// API key for the search provider.
    pub api_key: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: "https://serpapi.com/search".to_string(),
            api_key: String::new(),
            timeout_ms: 15_000,
        }
    }
}

/// Retrieval stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks returned by similarity search.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 4 }
    }
}

/// Conversation memory backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// "memory" for the in-process store, "sqlite" for the durable store.
    pub backend: String,
    /// Database path when the backend is "sqlite".
    pub sqlite_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            sqlite_path: "sibyl-history.db".to_string(),
        }
    }
}
