//! Namespaced in-memory vector index with brute-force cosine search.
//!
//! Each namespace holds an ordered list of embedded chunks. Search is O(n)
//! per namespace, which is fine for per-session document sets. The isolation
//! invariant is structural: a query against namespace N only ever scans N's
//! entry list.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sibyl_core::error::{Result, SibylError};
use sibyl_core::types::{DocumentChunk, NamespaceStats};

/// One retrieval hit: the stored chunk plus its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    /// Cosine similarity against the query vector.
    pub score: f64,
}

#[derive(Debug, Clone)]
struct VectorEntry {
    embedding: Vec<f32>,
    chunk: DocumentChunk,
}

/// Thread-safe namespaced vector index.
///
/// Cheap to clone; all clones share the same underlying store.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    namespaces: Arc<RwLock<HashMap<String, Vec<VectorEntry>>>>,
}

impl VectorIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self {
            namespaces: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Append embedded chunks to a namespace, creating it if needed.
    ///
    /// Additive: re-upserting the same content duplicates vectors.
    pub fn upsert(
        &self,
        namespace: &str,
        vectors: Vec<(Vec<f32>, DocumentChunk)>,
    ) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|e| SibylError::Index(format!("lock poisoned: {}", e)))?;
        let entries = namespaces.entry(namespace.to_string()).or_default();
        for (embedding, chunk) in vectors {
            entries.push(VectorEntry { embedding, chunk });
        }
        Ok(())
    }

    /// Return the top-k chunks in the namespace by descending cosine
    /// similarity. Ties keep insertion order (stable sort).
    ///
    /// An unknown or empty namespace yields an empty result, not an error.
    pub fn query(&self, namespace: &str, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|e| SibylError::Index(format!("lock poisoned: {}", e)))?;

        let Some(entries) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Remove all vectors from a namespace. The namespace key itself stays
    /// registered so subsequent queries see an empty set.
    pub fn reset(&self, namespace: &str) -> Result<()> {
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|e| SibylError::Index(format!("lock poisoned: {}", e)))?;
        if let Some(entries) = namespaces.get_mut(namespace) {
            entries.clear();
        }
        Ok(())
    }

    /// Stats for a namespace. An unknown namespace reports zero vectors.
    pub fn info(&self, namespace: &str) -> Result<NamespaceStats> {
        let namespaces = self
            .namespaces
            .read()
            .map_err(|e| SibylError::Index(format!("lock poisoned: {}", e)))?;
        Ok(NamespaceStats {
            namespace: namespace.to_string(),
            vector_count: namespaces.get(namespace).map(Vec::len).unwrap_or(0),
        })
    }
}

/// Cosine similarity between two vectors. Returns 0.0 on length mismatch or
/// zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
