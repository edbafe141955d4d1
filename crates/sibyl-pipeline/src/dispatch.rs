//! Mode dispatch: request validation, session checks, pipeline caching.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use sibyl_core::error::{Result, SibylError};
use sibyl_core::types::Mode;
use sibyl_llm::client::TokenStream;

use crate::pipelines::{Pipeline, PipelineContext};
use crate::registry::SessionRegistry;

/// Routes a validated question to the pipeline for its mode.
///
/// Pipelines are built lazily and cached; all three share one context.
pub struct Dispatcher {
    ctx: Arc<PipelineContext>,
    registry: Arc<SessionRegistry>,
    pipelines: Mutex<HashMap<Mode, Arc<Pipeline>>>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<PipelineContext>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            ctx,
            registry,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Answer a question in the given mode.
    ///
    /// Validation order is fixed: question shape first, session existence
    /// second, and only then are any collaborators touched.
    pub async fn dispatch(
        &self,
        mode: Mode,
        session_id: &str,
        question: &str,
    ) -> Result<TokenStream> {
        if question.trim().is_empty() {
            return Err(SibylError::Validation(
                "question must not be empty".to_string(),
            ));
        }
        self.registry.ensure_session(session_id)?;

        let pipeline = self.pipeline_for(mode);
        debug!(mode = %mode, session_id = %session_id, "Dispatching question");
        pipeline.invoke(session_id, question).await
    }

    fn pipeline_for(&self, mode: Mode) -> Arc<Pipeline> {
        let mut pipelines = self.pipelines.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            pipelines
                .entry(mode)
                .or_insert_with(|| Arc::new(Pipeline::new(mode, Arc::clone(&self.ctx)))),
        )
    }
}
