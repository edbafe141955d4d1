//! Orchestration core: conversation memory, the session registry, pipeline
//! stages, the three answering pipelines, and the mode dispatcher.

pub mod dispatch;
pub mod memory;
pub mod pipelines;
pub mod registry;
pub mod stages;

pub use dispatch::Dispatcher;
pub use memory::{HistoryStore, InMemoryHistory, SessionLocks, SqliteHistory};
pub use pipelines::{Pipeline, PipelineContext};
pub use registry::SessionRegistry;
