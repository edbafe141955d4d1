//! Embeddings, the namespaced vector index, and document ingestion.
//!
//! The index isolates each session's vectors under its own namespace;
//! retrieval against one namespace can never observe another's documents.

pub mod embedding;
pub mod index;
pub mod ingest;

pub use embedding::{EmbeddingService, HashEmbedding, HttpEmbeddingService};
pub use index::{ScoredChunk, VectorIndex};
pub use ingest::{IngestReport, IngestionPipeline};
