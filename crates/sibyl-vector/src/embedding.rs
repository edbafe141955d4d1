//! Embedding service trait and implementations.
//!
//! - `HttpEmbeddingService` calls an OpenAI-compatible `/embeddings`
//!   endpoint. This is the production backend.
//! - `HashEmbedding` produces deterministic hashed bag-of-words vectors for
//!   testing: texts sharing words score higher under cosine similarity, so
//!   ranking assertions are meaningful without a real model.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use sibyl_core::config::EmbeddingConfig;
use sibyl_core::error::{Result, SibylError};

/// Service for generating text embeddings.
///
/// Used for both ingestion (indexing chunks) and retrieval (embedding the
/// standalone question).
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

// ---------------------------------------------------------------------------
// HttpEmbeddingService - OpenAI-compatible /embeddings endpoint
// ---------------------------------------------------------------------------

/// Embedding backend calling an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingService {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SibylError::Config(format!("embedding http client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(SibylError::Embedding("cannot embed empty text".to_string()));
        }

        let body = json!({
            "model": self.config.model,
            "input": text,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SibylError::Embedding(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SibylError::Embedding(format!(
                "provider returned status {}",
                status.as_u16()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| SibylError::Embedding(format!("invalid response body: {}", e)))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| SibylError::Embedding("provider returned no embedding".to_string()))?;

        if vector.len() != self.config.dimensions {
            return Err(SibylError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.config.dimensions,
                vector.len()
            )));
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }
}

// ---------------------------------------------------------------------------
// HashEmbedding - deterministic bag-of-words vectors for testing
// ---------------------------------------------------------------------------

/// Number of dimensions produced by [`HashEmbedding`].
const HASH_DIMENSIONS: usize = 256;

/// Test embedding that hashes each word into a fixed-size vector.
///
/// Identical inputs always produce identical vectors, and texts with
/// overlapping vocabulary produce higher cosine similarity than unrelated
/// texts.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedding;

impl HashEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn bag_of_words(text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; HASH_DIMENSIONS];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let dim = (hasher.finish() as usize) % HASH_DIMENSIONS;
            result[dim] += 1.0;
        }

        // L2-normalize so cosine similarity is a plain dot product.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(SibylError::Embedding("cannot embed empty text".to_string()));
        }
        Ok(Self::bag_of_words(text))
    }

    fn dimensions(&self) -> usize {
        HASH_DIMENSIONS
    }
}
