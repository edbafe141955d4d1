//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, and body
//! limits. The `/ask` route is kept outside the compression layer so tokens
//! reach the client as soon as the model emits them.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sibyl_core::config::SibylConfig;
use sibyl_core::error::SibylError;

use crate::handlers;
use crate::state::AppState;

/// Maximum accepted upload body size.
const UPLOAD_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("x-session-id"),
        ]);

    let json_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/initialize", post(handlers::initialize))
        .route("/validate", post(handlers::validate))
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/document/{session_id}", get(handlers::document_stats))
        .route("/reset/{session_id}", delete(handlers::reset))
        .route("/history/{session_id}", get(handlers::history))
        .layer(CompressionLayer::new());

    // Streaming answers bypass compression so tokens are not buffered.
    let stream_routes = Router::new().route("/ask", post(handlers::ask));

    json_routes
        .merge(stream_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured address.
pub async fn start_server(config: &SibylConfig, state: AppState) -> Result<(), SibylError> {
    let addr = format!("{}:{}", config.general.host, config.general.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SibylError::Config(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router).await?;

    Ok(())
}
