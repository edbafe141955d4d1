//! Shared domain types for the Sibyl question-answering core.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SibylError;

/// The three answering strategies a request can select.
///
/// Parsed from the request body before any collaborator is touched, so an
/// unknown mode fails fast with [`SibylError::UnknownMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Plain conversational chat, no external grounding.
    Chat,
    /// Document-grounded retrieval over the session's namespace.
    Rag,
    /// Web-search-augmented answering.
    Web,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Chat => "chat",
            Mode::Rag => "rag",
            Mode::Web => "web",
        }
    }
}

impl FromStr for Mode {
    type Err = SibylError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Mode::Chat),
            "rag" => Ok(Mode::Rag),
            "web" => Ok(Mode::Web),
            other => Err(SibylError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn in a session's append-only conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A bounded span of source text, the unit of embedding and retrieval.
///
/// Produced by the upload glue (or any external splitter); immutable once
/// created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// The chunk text.
    pub text: String,
    /// Where the chunk came from (filename or other label).
    pub source: String,
    /// Character offset of the chunk within its source.
    pub offset: usize,
}

impl DocumentChunk {
    pub fn new(text: impl Into<String>, source: impl Into<String>, offset: usize) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            offset,
        }
    }
}

/// Outcome of one web-search stage invocation. Ephemeral; never persisted.
///
/// On provider failure `error` is true and `results` holds fallback text so
/// the generation stage can still produce a degraded answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: String,
    pub query_used: String,
    pub timestamp: DateTime<Utc>,
    pub error: bool,
}

impl SearchOutcome {
    /// Fallback text surfaced to generation when the provider fails.
    pub const FALLBACK_TEXT: &'static str =
        "Error occurred while searching. Please try again.";

    pub fn success(results: impl Into<String>, query_used: impl Into<String>) -> Self {
        Self {
            results: results.into(),
            query_used: query_used.into(),
            timestamp: Utc::now(),
            error: false,
        }
    }

    pub fn degraded(query_used: impl Into<String>) -> Self {
        Self {
            results: Self::FALLBACK_TEXT.to_string(),
            query_used: query_used.into(),
            timestamp: Utc::now(),
            error: true,
        }
    }
}

/// Stats for one namespace, served by `/document/{sessionId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceStats {
    pub namespace: String,
    pub vector_count: usize,
}
