//! HTTP surface: routes, handlers, shared state, and API error mapping.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod split;
pub mod state;

pub use routes::{create_router, start_server};
pub use state::AppState;
