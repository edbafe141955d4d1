//! Session lifecycle: explicit creation, validation, and reset.
//!
//! A session id doubles as the vector namespace, so the registry owns the
//! index handle and is the only place namespaces get cleared.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::info;

use sibyl_core::error::{Result, SibylError};
use sibyl_core::types::NamespaceStats;
use sibyl_vector::VectorIndex;

/// Registry of initialized sessions.
pub struct SessionRegistry {
    sessions: Mutex<HashSet<String>>,
    index: VectorIndex,
}

impl SessionRegistry {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            sessions: Mutex::new(HashSet::new()),
            index,
        }
    }

    /// Register a new session. Fails if the id is already registered.
    pub fn create_session(&self, session_id: &str) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(SibylError::Validation(
                "session id must not be empty".to_string(),
            ));
        }
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| SibylError::Index(format!("lock poisoned: {}", e)))?;
        if !sessions.insert(session_id.to_string()) {
            return Err(SibylError::SessionExists(session_id.to_string()));
        }
        info!(session_id = %session_id, "Session created");
        Ok(())
    }

    /// Whether a session has been initialized.
    pub fn validate_session(&self, session_id: &str) -> Result<bool> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|e| SibylError::Index(format!("lock poisoned: {}", e)))?;
        Ok(sessions.contains(session_id))
    }

    /// Require an initialized session, or fail with `SessionNotFound`.
    pub fn ensure_session(&self, session_id: &str) -> Result<()> {
        if self.validate_session(session_id)? {
            Ok(())
        } else {
            Err(SibylError::SessionNotFound(session_id.to_string()))
        }
    }

    /// Clear the session's indexed documents. Conversation memory is kept;
    /// only the vector namespace is emptied.
    pub fn reset_session(&self, session_id: &str) -> Result<()> {
        self.ensure_session(session_id)?;
        self.index.reset(session_id)?;
        info!(session_id = %session_id, "Session documents cleared");
        Ok(())
    }

    /// Document stats for the session's namespace.
    pub fn session_info(&self, session_id: &str) -> Result<NamespaceStats> {
        self.ensure_session(session_id)?;
        self.index.info(session_id)
    }
}
