//! Reusable pipeline stages.
//!
//! Each stage is a free async function over the collaborator traits so the
//! pipelines stay thin and the stages stay testable with mocks. Failure
//! policy differs by stage and is documented on each: rephrase and retrieval
//! fail fast, web search degrades.

use std::sync::Arc;

use tracing::{debug, warn};

use sibyl_core::error::{Result, SibylError};
use sibyl_core::types::{ConversationMessage, SearchOutcome};
use sibyl_llm::client::CompletionClient;
use sibyl_llm::prompt::{
    self, ChatPrompt, REPHRASE_SYSTEM_TEMPLATE, SEARCH_QUERY_SYSTEM_TEMPLATE,
};
use sibyl_vector::{EmbeddingService, VectorIndex};

/// Rewrite a follow-up question into a standalone one using the session's
/// history. The completion call happens unconditionally, even on a fresh
/// session with no prior turns.
///
/// Fails fast: a rephrase failure aborts the request before any retrieval.
pub async fn rephrase_question(
    client: &dyn CompletionClient,
    history: &[ConversationMessage],
    question: &str,
) -> Result<String> {
    let built = ChatPrompt::system(REPHRASE_SYSTEM_TEMPLATE)
        .with_history(history)
        .with_human(prompt::rephrase_human(question));
    let standalone = client.complete(&built).await?;
    let standalone = standalone.trim().to_string();

    debug!(original = %question, standalone = %standalone, "Rephrased question");
    if standalone.is_empty() {
        // Treat a blank rewrite as the model declining; keep the original.
        return Ok(question.to_string());
    }
    Ok(standalone)
}

/// Distill the question and history into a compact web-search query.
///
/// An empty query is an error the caller decides how to handle; this stage
/// does not apply degradation policy itself.
pub async fn synthesize_search_query(
    client: &dyn CompletionClient,
    history: &[ConversationMessage],
    question: &str,
) -> Result<String> {
    let built = ChatPrompt::system(SEARCH_QUERY_SYSTEM_TEMPLATE)
        .with_history(history)
        .with_human(question);
    let query = client.complete(&built).await?;
    let query = query.trim().to_string();

    if query.is_empty() {
        return Err(SibylError::EmptySearchQuery);
    }
    debug!(question = %question, query = %query, "Synthesized search query");
    Ok(query)
}

/// Embed the standalone question and retrieve the top-k chunks from the
/// session's namespace, formatted for prompt injection.
///
/// An empty namespace is not an error: generation proceeds with empty
/// context and the model answers from history alone.
pub async fn retrieve_context(
    embedder: &Arc<dyn EmbeddingService>,
    index: &VectorIndex,
    namespace: &str,
    standalone_question: &str,
    top_k: usize,
) -> Result<String> {
    let query_vector = embedder.embed(standalone_question).await?;
    let hits = index.query(namespace, &query_vector, top_k)?;

    debug!(
        namespace = %namespace,
        hits = hits.len(),
        "Retrieved context chunks"
    );

    let docs: Vec<String> = hits
        .iter()
        .map(|hit| format!("<doc>\n{}\n</doc>", hit.chunk.text))
        .collect();
    Ok(docs.join("\n"))
}

/// Run the web search with graceful degradation: a provider failure is
/// logged and folded into a degraded outcome, never propagated.
pub async fn web_search(
    provider: &dyn sibyl_search::SearchProvider,
    query: &str,
) -> SearchOutcome {
    match provider.search(query).await {
        Ok(results) => SearchOutcome::success(results, query),
        Err(e) => {
            warn!(query = %query, error = %e, "Web search failed, degrading");
            SearchOutcome::degraded(query)
        }
    }
}
