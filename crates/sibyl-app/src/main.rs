//! Sibyl application binary - composition root.
//!
//! Ties the workspace crates together into a single executable:
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Apply environment overrides and validate credentials (fail fast)
//! 3. Build the HTTP collaborators (completion, embedding, search, memory)
//! 4. Start the axum REST API server

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use sibyl_api::{routes, AppState};
use sibyl_core::config::SibylConfig;
use sibyl_core::error::Result;
use sibyl_llm::client::HttpCompletionClient;
use sibyl_pipeline::memory::{HistoryStore, InMemoryHistory, SessionLocks, SqliteHistory};
use sibyl_pipeline::pipelines::PipelineContext;
use sibyl_search::HttpSearchProvider;
use sibyl_vector::{HttpEmbeddingService, VectorIndex};

mod cli;

/// Build the shared pipeline context from validated configuration.
fn build_context(config: &SibylConfig) -> Result<Arc<PipelineContext>> {
    let chat_client = HttpCompletionClient::new(
        &config.llm,
        config.llm.chat_model.clone(),
        config.llm.temperature,
    )?;
    // Utility calls are deterministic rewrites, so temperature stays at zero.
    let utility_client =
        HttpCompletionClient::new(&config.llm, config.llm.utility_model.clone(), 0.0)?;
    let embedder = HttpEmbeddingService::new(config.embedding.clone())?;
    let search = HttpSearchProvider::new(config.search.clone())?;

    let history: Arc<dyn HistoryStore> = match config.memory.backend.as_str() {
        "sqlite" => {
            let store = SqliteHistory::open(Path::new(&config.memory.sqlite_path))?;
            tracing::info!(path = %config.memory.sqlite_path, "SQLite history store opened");
            Arc::new(store)
        }
        _ => {
            tracing::info!("In-memory history store selected");
            Arc::new(InMemoryHistory::new())
        }
    };

    Ok(Arc::new(PipelineContext {
        chat_client: Arc::new(chat_client),
        utility_client: Arc::new(utility_client),
        embedder: Arc::new(embedder),
        index: VectorIndex::new(),
        search: Arc::new(search),
        history,
        locks: Arc::new(SessionLocks::new()),
        top_k: config.retrieval.top_k,
    }))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = cli::CliArgs::parse();

    // Config first so the CLI log level can fall back to the file's value.
    let config_file = args.resolve_config_path();
    let mut config = SibylConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    config.general.port = args.resolve_port(config.general.port);
    let log_level = args.resolve_log_level(&config.general.log_level);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    tracing::info!("Starting Sibyl v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Missing credentials fail here, not on the first request.
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let ctx = build_context(&config)?;
    let state = AppState::new(config.clone(), ctx);

    if let Err(e) = routes::start_server(&config, state).await {
        tracing::error!(error = %e, "Server failed — is another instance running?");
        return Err(e.into());
    }

    Ok(())
}
