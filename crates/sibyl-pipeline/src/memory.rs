//! Per-session conversation memory.
//!
//! `HistoryStore` is the narrow contract the pipelines consume:
//! append-only ordered message logs keyed by session id. Two backends are
//! provided: a process-local map and a durable SQLite store. `SessionLocks`
//! serializes memory mutations per session so concurrent requests to one
//! session cannot interleave their history appends.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use sibyl_core::error::{Result, SibylError};
use sibyl_core::types::{ConversationMessage, Role};

/// Ordered per-session message log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a message to the session's log.
    async fn append(&self, session_id: &str, message: ConversationMessage) -> Result<()>;

    /// List the session's messages in append order. Unknown sessions yield
    /// an empty log.
    async fn list(&self, session_id: &str) -> Result<Vec<ConversationMessage>>;
}

// ---------------------------------------------------------------------------
// InMemoryHistory
// ---------------------------------------------------------------------------

/// Process-local history store.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    logs: Mutex<HashMap<String, Vec<ConversationMessage>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append(&self, session_id: &str, message: ConversationMessage) -> Result<()> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|e| SibylError::History(format!("lock poisoned: {}", e)))?;
        logs.entry(session_id.to_string()).or_default().push(message);
        Ok(())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        let logs = self
            .logs
            .lock()
            .map_err(|e| SibylError::History(format!("lock poisoned: {}", e)))?;
        Ok(logs.get(session_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// SqliteHistory
// ---------------------------------------------------------------------------

/// Durable history store backed by SQLite.
pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| SibylError::History(format!("open database: {}", e)))?;
        Self::with_connection(conn)
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SibylError::History(format!("open database: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages (session_id, id);",
        )
        .map_err(|e| SibylError::History(format!("create schema: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn append(&self, session_id: &str, message: ConversationMessage) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SibylError::History(format!("lock poisoned: {}", e)))?;
        conn.execute(
            "INSERT INTO messages (session_id, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                session_id,
                message.role.as_str(),
                message.content,
                message.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| SibylError::History(format!("insert message: {}", e)))?;
        Ok(())
    }

    async fn list(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| SibylError::History(format!("lock poisoned: {}", e)))?;
        let mut stmt = conn
            .prepare(
                "SELECT role, content, timestamp FROM messages
                 WHERE session_id = ?1 ORDER BY id ASC",
            )
            .map_err(|e| SibylError::History(format!("prepare query: {}", e)))?;

        let rows = stmt
            .query_map([session_id], |row| {
                let role: String = row.get(0)?;
                let content: String = row.get(1)?;
                let timestamp: String = row.get(2)?;
                Ok((role, content, timestamp))
            })
            .map_err(|e| SibylError::History(format!("query messages: {}", e)))?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content, timestamp) =
                row.map_err(|e| SibylError::History(format!("read row: {}", e)))?;
            let role = match role.as_str() {
                "human" => Role::Human,
                "assistant" => Role::Assistant,
                other => {
                    return Err(SibylError::History(format!("unknown role: {}", other)));
                }
            };
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| SibylError::History(format!("bad timestamp: {}", e)))?
                .with_timezone(&Utc);
            messages.push(ConversationMessage {
                role,
                content,
                timestamp,
            });
        }
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// SessionLocks
// ---------------------------------------------------------------------------

/// Per-session async mutexes serializing memory mutations.
///
/// A request holds its session's lock from the first history read until the
/// assistant turn is appended, so interleaved requests to one session keep
/// the append-order invariant.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a session, creating it on first use.
    pub async fn acquire(&self, session_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(
                locks
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}
