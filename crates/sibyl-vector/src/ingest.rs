//! Document ingestion: embed chunks and upsert them into a namespace.

use std::sync::Arc;

use tracing::{debug, info};

use sibyl_core::error::{Result, SibylError};
use sibyl_core::types::DocumentChunk;

use crate::embedding::EmbeddingService;
use crate::index::VectorIndex;

/// Summary of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Chunks embedded and stored.
    pub ingested: usize,
    /// Chunks skipped because their text was empty.
    pub skipped: usize,
}

/// Turns raw chunks into embedded vectors inside a target namespace.
///
/// Ingestion is additive: re-ingesting overlapping content duplicates
/// vectors. There is no transactional guarantee; an embedding failure midway
/// leaves earlier chunks stored.
pub struct IngestionPipeline {
    index: VectorIndex,
    embedder: Arc<dyn EmbeddingService>,
}

impl IngestionPipeline {
    pub fn new(index: VectorIndex, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self { index, embedder }
    }

    /// Embed each chunk in order and upsert it into the namespace.
    pub async fn ingest(
        &self,
        namespace: &str,
        chunks: Vec<DocumentChunk>,
    ) -> Result<IngestReport> {
        let mut ingested = 0usize;
        let mut skipped = 0usize;

        for chunk in chunks {
            if chunk.text.trim().is_empty() {
                debug!(source = %chunk.source, offset = chunk.offset, "Skipping empty chunk");
                skipped += 1;
                continue;
            }

            let embedding = self
                .embedder
                .embed(&chunk.text)
                .await
                .map_err(|e| SibylError::Ingestion(e.to_string()))?;

            self.index
                .upsert(namespace, vec![(embedding, chunk)])
                .map_err(|e| SibylError::Ingestion(e.to_string()))?;
            ingested += 1;
        }

        info!(namespace, ingested, skipped, "Ingestion complete");
        Ok(IngestReport { ingested, skipped })
    }

    /// The index this pipeline writes into.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}
