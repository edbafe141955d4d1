//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::sync::Arc;
use std::time::Instant;

use sibyl_core::config::SibylConfig;
use sibyl_pipeline::{Dispatcher, HistoryStore, SessionRegistry};
use sibyl_pipeline::pipelines::PipelineContext;
use sibyl_vector::IngestionPipeline;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<SibylConfig>,
    /// Mode dispatcher owning the pipelines and session registry.
    pub dispatcher: Arc<Dispatcher>,
    /// Document ingestion pipeline (embed + upsert).
    pub ingestion: Arc<IngestionPipeline>,
    /// Conversation memory, shared with the pipelines.
    pub history: Arc<dyn HistoryStore>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState from config and the shared pipeline context.
    ///
    /// The registry, dispatcher, and ingestion pipeline all share the
    /// context's vector index, so session ids and namespaces stay aligned.
    pub fn new(config: SibylConfig, ctx: Arc<PipelineContext>) -> Self {
        let registry = Arc::new(SessionRegistry::new(ctx.index.clone()));
        let ingestion = Arc::new(IngestionPipeline::new(
            ctx.index.clone(),
            Arc::clone(&ctx.embedder),
        ));
        let history = Arc::clone(&ctx.history);
        let dispatcher = Arc::new(Dispatcher::new(ctx, registry));

        Self {
            config: Arc::new(config),
            dispatcher,
            ingestion,
            history,
            start_time: Instant::now(),
        }
    }

    /// The session registry behind the dispatcher.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.dispatcher.registry()
    }
}
