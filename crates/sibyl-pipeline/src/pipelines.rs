//! The three answering pipelines.
//!
//! Every pipeline shares the same skeleton: acquire the session lock, load
//! history, run mode-specific preparation stages, record the human turn,
//! stream the answer, and record the assistant turn once the stream
//! completes. The session lock travels into the forwarding task so the
//! session stays serialized until the assistant turn is appended (or the
//! request is abandoned).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use sibyl_core::error::{Result, SibylError};
use sibyl_core::types::{ConversationMessage, Mode, SearchOutcome};
use sibyl_llm::client::{CompletionClient, TokenStream};
use sibyl_llm::prompt::{
    self, ChatPrompt, CHAT_SYSTEM_TEMPLATE, WEB_SEARCH_ANSWER_SYSTEM_TEMPLATE,
};
use sibyl_search::SearchProvider;
use sibyl_vector::{EmbeddingService, VectorIndex};

use crate::memory::{HistoryStore, SessionLocks};
use crate::stages;

/// Capacity of the answer forwarding channel.
const ANSWER_CHANNEL_CAPACITY: usize = 32;

/// Shared collaborators handed to every pipeline.
pub struct PipelineContext {
    /// Streaming model used for answer generation.
    pub chat_client: Arc<dyn CompletionClient>,
    /// Cheaper model used for rephrasing and query synthesis.
    pub utility_client: Arc<dyn CompletionClient>,
    pub embedder: Arc<dyn EmbeddingService>,
    pub index: VectorIndex,
    pub search: Arc<dyn SearchProvider>,
    pub history: Arc<dyn HistoryStore>,
    pub locks: Arc<SessionLocks>,
    /// Retrieval depth for RAG context.
    pub top_k: usize,
}

/// One answering pipeline, bound to a mode and the shared context.
pub struct Pipeline {
    mode: Mode,
    ctx: Arc<PipelineContext>,
}

impl Pipeline {
    pub fn new(mode: Mode, ctx: Arc<PipelineContext>) -> Self {
        Self { mode, ctx }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Answer a question for a session, yielding tokens as they arrive.
    ///
    /// The human turn is recorded before generation starts; the assistant
    /// turn is recorded only after the stream is fully consumed. A stream
    /// abandoned mid-answer leaves no assistant turn behind.
    pub async fn invoke(&self, session_id: &str, question: &str) -> Result<TokenStream> {
        let guard = self.ctx.locks.acquire(session_id).await;
        let history = self.ctx.history.list(session_id).await?;

        let built = match self.mode {
            Mode::Chat => self.prepare_chat(&history, question),
            Mode::Rag => self.prepare_rag(session_id, &history, question).await?,
            Mode::Web => self.prepare_web(&history, question).await?,
        };

        self.ctx
            .history
            .append(session_id, ConversationMessage::human(question))
            .await?;

        let upstream = self.ctx.chat_client.stream(&built).await?;

        let (tx, rx) = mpsc::channel::<Result<String>>(ANSWER_CHANNEL_CAPACITY);
        let history_store = Arc::clone(&self.ctx.history);
        let session = session_id.to_string();
        let mode = self.mode;

        tokio::spawn(async move {
            // Holding the guard serializes the session until this task ends.
            let _guard = guard;
            let mut upstream = upstream;
            let mut answer = String::new();

            while let Some(item) = upstream.next().await {
                match item {
                    Ok(token) => {
                        answer.push_str(&token);
                        if tx.send(Ok(token)).await.is_err() {
                            // Consumer disconnected; discard the partial
                            // answer rather than record a truncated turn.
                            debug!(session_id = %session, mode = %mode, "Answer stream abandoned");
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if let Err(e) = history_store
                .append(&session, ConversationMessage::assistant(answer))
                .await
            {
                error!(session_id = %session, error = %e, "Failed to record assistant turn");
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn prepare_chat(&self, history: &[ConversationMessage], question: &str) -> ChatPrompt {
        ChatPrompt::system(CHAT_SYSTEM_TEMPLATE)
            .with_history(history)
            .with_human(question)
    }

    async fn prepare_rag(
        &self,
        session_id: &str,
        history: &[ConversationMessage],
        question: &str,
    ) -> Result<ChatPrompt> {
        let standalone =
            stages::rephrase_question(self.ctx.utility_client.as_ref(), history, question).await?;
        let context = stages::retrieve_context(
            &self.ctx.embedder,
            &self.ctx.index,
            session_id,
            &standalone,
            self.ctx.top_k,
        )
        .await?;

        Ok(ChatPrompt::system(prompt::rag_answer_system(&context))
            .with_history(history)
            .with_human(prompt::rag_answer_human(&standalone)))
    }

    async fn prepare_web(
        &self,
        history: &[ConversationMessage],
        question: &str,
    ) -> Result<ChatPrompt> {
        let outcome = match stages::synthesize_search_query(
            self.ctx.utility_client.as_ref(),
            history,
            question,
        )
        .await
        {
            Ok(query) => stages::web_search(self.ctx.search.as_ref(), &query).await,
            // An unusable query skips the provider but still answers.
            Err(SibylError::EmptySearchQuery) => SearchOutcome::degraded(""),
            Err(e) => return Err(e),
        };

        Ok(ChatPrompt::system(WEB_SEARCH_ANSWER_SYSTEM_TEMPLATE)
            .with_history(history)
            .with_human(prompt::web_answer_human(
                question,
                &outcome.query_used,
                &outcome.results,
            )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::memory::InMemoryHistory;
    use sibyl_core::types::{DocumentChunk, Role};
    use sibyl_llm::client::MockCompletionClient;
    use sibyl_search::MockSearchProvider;
    use sibyl_vector::HashEmbedding;

    /// Embedder wrapper counting `embed` calls.
    struct CountingEmbedding {
        inner: HashEmbedding,
        calls: AtomicUsize,
    }

    impl CountingEmbedding {
        fn new() -> Self {
            Self {
                inner: HashEmbedding::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingService for CountingEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    struct Harness {
        chat: Arc<MockCompletionClient>,
        utility: Arc<MockCompletionClient>,
        embedder: Arc<CountingEmbedding>,
        index: VectorIndex,
        search: Arc<MockSearchProvider>,
        history: Arc<InMemoryHistory>,
        ctx: Arc<PipelineContext>,
    }

    fn harness() -> Harness {
        let chat = Arc::new(MockCompletionClient::new());
        let utility = Arc::new(MockCompletionClient::new());
        let embedder = Arc::new(CountingEmbedding::new());
        let index = VectorIndex::new();
        let search = Arc::new(MockSearchProvider::new());
        let history = Arc::new(InMemoryHistory::new());

        let ctx = Arc::new(PipelineContext {
            chat_client: chat.clone(),
            utility_client: utility.clone(),
            embedder: embedder.clone(),
            index: index.clone(),
            search: search.clone(),
            history: history.clone(),
            locks: Arc::new(SessionLocks::new()),
            top_k: 4,
        });

        Harness {
            chat,
            utility,
            embedder,
            index,
            search,
            history,
            ctx,
        }
    }

    async fn collect(mut stream: TokenStream) -> Result<String> {
        let mut answer = String::new();
        while let Some(item) = stream.next().await {
            answer.push_str(&item?);
        }
        Ok(answer)
    }

    #[tokio::test]
    async fn test_chat_pipeline_streams_and_records_history() {
        let h = harness();
        h.chat.push_stream_tokens(vec!["Hello", ", ", "world"]);

        let pipeline = Pipeline::new(Mode::Chat, h.ctx.clone());
        let stream = pipeline.invoke("s1", "greet me").await.unwrap();
        let answer = collect(stream).await.unwrap();
        assert_eq!(answer, "Hello, world");

        // Assistant append happens in a spawned task; give it a beat.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = h.history.list("s1").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].role, Role::Human);
        assert_eq!(log[0].content, "greet me");
        assert_eq!(log[1].role, Role::Assistant);
        assert_eq!(log[1].content, "Hello, world");
    }

    #[tokio::test]
    async fn test_chat_pipeline_touches_no_other_collaborator() {
        let h = harness();
        let pipeline = Pipeline::new(Mode::Chat, h.ctx.clone());
        let stream = pipeline.invoke("s1", "hi").await.unwrap();
        collect(stream).await.unwrap();

        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.search.calls(), 0);
        assert_eq!(h.utility.complete_calls(), 0);
    }

    #[tokio::test]
    async fn test_rag_pipeline_injects_retrieved_context() {
        let h = harness();

        let paris = "Paris is the capital of France.";
        let berlin = "Berlin is the capital of Germany.";
        let mut vectors = Vec::new();
        for (i, text) in [paris, berlin].iter().enumerate() {
            let v = h.embedder.embed(text).await.unwrap();
            vectors.push((v, DocumentChunk::new(*text, "geo.txt", i * 40)));
        }
        h.index.upsert("s1", vectors).unwrap();

        h.utility.push_completion("What is the capital of France?");
        h.chat.push_stream_tokens(vec!["Paris."]);

        let pipeline = Pipeline::new(Mode::Rag, h.ctx.clone());
        let stream = pipeline
            .invoke("s1", "What is the capital of France?")
            .await
            .unwrap();
        let answer = collect(stream).await.unwrap();
        assert_eq!(answer, "Paris.");

        // The standalone-question rewrite runs even on a fresh session.
        assert_eq!(h.utility.complete_calls(), 1);
        // Two ingestion embeds plus one query embed.
        assert!(h.embedder.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(h.search.calls(), 0);
    }

    #[tokio::test]
    async fn test_rag_pipeline_rephrases_with_history() {
        let h = harness();
        h.history
            .append("s1", ConversationMessage::human("Tell me about France."))
            .await
            .unwrap();
        h.history
            .append(
                "s1",
                ConversationMessage::assistant("France is in Europe."),
            )
            .await
            .unwrap();

        h.utility.push_completion("What is the capital of France?");
        h.chat.push_stream_tokens(vec!["Paris."]);

        let pipeline = Pipeline::new(Mode::Rag, h.ctx.clone());
        let stream = pipeline.invoke("s1", "What is its capital?").await.unwrap();
        collect(stream).await.unwrap();

        assert_eq!(h.utility.complete_calls(), 1);
    }

    #[tokio::test]
    async fn test_rag_rephrase_failure_aborts_before_retrieval() {
        let h = harness();
        h.history
            .append("s1", ConversationMessage::human("earlier turn"))
            .await
            .unwrap();
        h.utility.push_completion_error("utility model down");

        let pipeline = Pipeline::new(Mode::Rag, h.ctx.clone());
        let err = pipeline
            .invoke("s1", "follow up?")
            .await
            .err()
            .expect("rephrase failure should abort the pipeline");
        assert!(matches!(err, SibylError::Generation(_)));

        // Nothing downstream of the failed stage ran.
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.chat.stream_calls(), 0);
        // The human turn was not recorded either.
        assert_eq!(h.history.list("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_web_pipeline_searches_then_streams() {
        let h = harness();
        h.utility.push_completion("Tesla latest news 2024");
        h.search.push_result("Tesla delivered record numbers.");
        h.chat.push_stream_tokens(vec!["Record ", "deliveries."]);

        let pipeline = Pipeline::new(Mode::Web, h.ctx.clone());
        let stream = pipeline
            .invoke("s1", "What's the latest Tesla news?")
            .await
            .unwrap();
        let answer = collect(stream).await.unwrap();

        assert_eq!(answer, "Record deliveries.");
        assert_eq!(h.search.calls(), 1);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_web_pipeline_degrades_on_provider_failure() {
        let h = harness();
        h.utility.push_completion("Tesla latest news 2024");
        h.search.push_error("rate limited");
        h.chat.push_stream_tokens(vec!["Search is down right now."]);

        let pipeline = Pipeline::new(Mode::Web, h.ctx.clone());
        // The provider failure never surfaces to the caller.
        let stream = pipeline
            .invoke("s1", "What's the latest Tesla news?")
            .await
            .unwrap();
        let answer = collect(stream).await.unwrap();
        assert_eq!(answer, "Search is down right now.");
        assert_eq!(h.search.calls(), 1);
    }

    #[tokio::test]
    async fn test_web_pipeline_empty_query_skips_provider() {
        let h = harness();
        h.utility.push_completion("   ");
        h.chat.push_stream_tokens(vec!["Answering without search."]);

        let pipeline = Pipeline::new(Mode::Web, h.ctx.clone());
        let stream = pipeline.invoke("s1", "???").await.unwrap();
        collect(stream).await.unwrap();

        assert_eq!(h.search.calls(), 0);
    }

    #[tokio::test]
    async fn test_web_query_synthesis_failure_propagates() {
        let h = harness();
        h.utility.push_completion_error("utility model down");

        let pipeline = Pipeline::new(Mode::Web, h.ctx.clone());
        let err = pipeline
            .invoke("s1", "q")
            .await
            .err()
            .expect("query synthesis failure should propagate");
        assert!(matches!(err, SibylError::Generation(_)));
        assert_eq!(h.search.calls(), 0);
    }

    #[tokio::test]
    async fn test_stream_setup_failure_leaves_no_assistant_turn() {
        let h = harness();
        h.chat.push_stream_error("no capacity");

        let pipeline = Pipeline::new(Mode::Chat, h.ctx.clone());
        let err = pipeline
            .invoke("s1", "hi")
            .await
            .err()
            .expect("stream setup failure should propagate");
        assert!(matches!(err, SibylError::Generation(_)));

        let log = h.history.list("s1").await.unwrap();
        // The human turn was recorded before generation failed.
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].role, Role::Human);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_truncates_and_records_no_assistant_turn() {
        let h = harness();
        h.chat.push_stream_items(vec![
            Ok("par".to_string()),
            Err(SibylError::Generation("connection reset".to_string())),
        ]);

        let pipeline = Pipeline::new(Mode::Chat, h.ctx.clone());
        let mut stream = pipeline.invoke("s1", "hi").await.unwrap();

        // Tokens before the failure arrive intact.
        assert_eq!(stream.next().await.unwrap().unwrap(), "par");
        // The failure surfaces as an error item, then the stream ends.
        let err = stream.next().await.unwrap().err().expect("expected error");
        assert!(matches!(err, SibylError::Generation(_)));
        assert!(stream.next().await.is_none());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = h.history.list("s1").await.unwrap();
        // Only the human turn was recorded; no truncated assistant turn.
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].role, Role::Human);
    }

    #[tokio::test]
    async fn test_abandoned_stream_records_no_assistant_turn() {
        let h = harness();
        // More tokens than the channel holds, so the forwarder must observe
        // the dropped receiver.
        let tokens: Vec<&str> = std::iter::repeat("t").take(100).collect();
        h.chat.push_stream_tokens(tokens);

        let pipeline = Pipeline::new(Mode::Chat, h.ctx.clone());
        let mut stream = pipeline.invoke("s1", "hi").await.unwrap();
        // Take one token, then walk away.
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "t");
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let log = h.history.list("s1").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].role, Role::Human);
    }

    #[tokio::test]
    async fn test_concurrent_requests_same_session_serialize() {
        let h = harness();
        h.chat.push_stream_tokens(vec!["first answer"]);
        h.chat.push_stream_tokens(vec!["second answer"]);

        let pipeline = Arc::new(Pipeline::new(Mode::Chat, h.ctx.clone()));

        let p1 = pipeline.clone();
        let t1 = tokio::spawn(async move {
            let s = p1.invoke("s1", "first question").await.unwrap();
            collect(s).await.unwrap()
        });
        let p2 = pipeline.clone();
        let t2 = tokio::spawn(async move {
            let s = p2.invoke("s1", "second question").await.unwrap();
            collect(s).await.unwrap()
        });
        t1.await.unwrap();
        t2.await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let log = h.history.list("s1").await.unwrap();
        assert_eq!(log.len(), 4);
        // Turns never interleave: each human turn is followed by its answer.
        assert_eq!(log[0].role, Role::Human);
        assert_eq!(log[1].role, Role::Assistant);
        assert_eq!(log[2].role, Role::Human);
        assert_eq!(log[3].role, Role::Assistant);
    }
}
