use thiserror::Error;

/// Top-level error type for the Sibyl system.
///
/// Each variant maps to one failure class from the orchestration core or one
/// of its collaborators. Subsystem crates return `SibylError` directly so
/// the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SibylError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Session already exists: {0}")]
    SessionExists(String),

    #[error("Session not initialized: {0}")]
    SessionNotFound(String),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    #[error("Upstream generation error: {0}")]
    Generation(String),

    #[error("Search query is empty")]
    EmptySearchQuery,

    #[error("Web search error: {0}")]
    Search(String),

    #[error("History store error: {0}")]
    History(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for SibylError {
    fn from(err: toml::de::Error) -> Self {
        SibylError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SibylError {
    fn from(err: serde_json::Error) -> Self {
        SibylError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Sibyl operations.
pub type Result<T> = std::result::Result<T, SibylError>;
