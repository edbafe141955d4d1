//! Integration tests for the HTTP surface.
//!
//! Every endpoint is exercised through `tower::ServiceExt::oneshot` against
//! a router wired with mock collaborators, so tests cover routing, status
//! mapping, and body shapes without any network traffic.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use sibyl_api::create_router;
use sibyl_api::handlers::{
    DocumentStatsResponse, HealthResponse, UploadResponse, ValidateResponse,
};
use sibyl_api::state::AppState;
use sibyl_core::config::SibylConfig;
use sibyl_llm::client::MockCompletionClient;
use sibyl_pipeline::memory::{InMemoryHistory, SessionLocks};
use sibyl_pipeline::pipelines::PipelineContext;
use sibyl_search::MockSearchProvider;
use sibyl_vector::{HashEmbedding, VectorIndex};

// =============================================================================
// Helpers
// =============================================================================

struct TestHarness {
    state: AppState,
    chat: Arc<MockCompletionClient>,
    utility: Arc<MockCompletionClient>,
    search: Arc<MockSearchProvider>,
}

/// Fresh state wired with mock collaborators.
fn make_harness() -> TestHarness {
    let chat = Arc::new(MockCompletionClient::new());
    let utility = Arc::new(MockCompletionClient::new());
    let search = Arc::new(MockSearchProvider::new());

    let ctx = Arc::new(PipelineContext {
        chat_client: chat.clone(),
        utility_client: utility.clone(),
        embedder: Arc::new(HashEmbedding::new()),
        index: VectorIndex::new(),
        search: search.clone(),
        history: Arc::new(InMemoryHistory::new()),
        locks: Arc::new(SessionLocks::new()),
        top_k: 4,
    });

    TestHarness {
        state: AppState::new(SibylConfig::default(), ctx),
        chat,
        utility,
        search,
    }
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn upload_request(session_id: &str, filename: &str, content: &str) -> Request<Body> {
    let boundary = "sibyl-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
        b = boundary,
        f = filename,
        c = content
    );
    Request::post("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header("x-session-id", session_id)
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

/// Initialize a session through the API.
async fn init_session(router: &axum::Router, session_id: &str) {
    let resp = router
        .clone()
        .oneshot(post_json(
            "/initialize",
            &format!(r#"{{"sessionId":"{}"}}"#, session_id),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// =============================================================================
// /health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let h = make_harness();
    let resp = create_router(h.state).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let health: HealthResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(health.status, "ok");
}

// =============================================================================
// /initialize and /validate
// =============================================================================

#[tokio::test]
async fn test_initialize_then_validate() {
    let h = make_harness();
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    let resp = router
        .clone()
        .oneshot(post_json("/validate", r#"{"sessionId":"s1"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let valid: ValidateResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert!(valid.valid);
}

#[tokio::test]
async fn test_initialize_missing_id_is_bad_request() {
    let h = make_harness();
    let resp = create_router(h.state)
        .oneshot(post_json("/initialize", r#"{}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_initialize_duplicate_is_bad_request() {
    let h = make_harness();
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    let resp = router
        .oneshot(post_json("/initialize", r#"{"sessionId":"s1"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn test_validate_unknown_session_is_not_found() {
    let h = make_harness();
    let resp = create_router(h.state)
        .oneshot(post_json("/validate", r#"{"sessionId":"ghost"}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// /upload, /document, /reset
// =============================================================================

#[tokio::test]
async fn test_upload_and_document_stats() {
    let h = make_harness();
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    let resp = router
        .clone()
        .oneshot(upload_request("s1", "geo.txt", "Paris is the capital of France."))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report: UploadResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(report.ingested, 1);
    assert_eq!(report.skipped, 0);

    let resp = router.oneshot(get("/document/s1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let stats: DocumentStatsResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(stats.session_id, "s1");
    assert_eq!(stats.vector_count, 1);
}

#[tokio::test]
async fn test_upload_ignores_non_file_form_fields() {
    let h = make_harness();
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    let boundary = "sibyl-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\n\
         just a stray form field\r\n\
         --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"geo.txt\"\r\n\
         Content-Type: text/plain\r\n\r\nParis is the capital of France.\r\n--{b}--\r\n",
        b = boundary
    );
    let req = Request::post("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header("x-session-id", "s1")
        .body(Body::from(body))
        .unwrap();

    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let report: UploadResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    // Only the file part was chunked and embedded.
    assert_eq!(report.chunks, 1);
    assert_eq!(report.ingested, 1);

    let resp = router.oneshot(get("/document/s1")).await.unwrap();
    let stats: DocumentStatsResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(stats.vector_count, 1);
}

#[tokio::test]
async fn test_upload_without_session_header_is_bad_request() {
    let h = make_harness();
    let router = create_router(h.state);

    let boundary = "sibyl-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = boundary
    );
    let req = Request::post("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap();

    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_to_unknown_session_is_bad_request() {
    let h = make_harness();
    let resp = create_router(h.state)
        .oneshot(upload_request("ghost", "a.txt", "hello"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("not initialized"));
}

#[tokio::test]
async fn test_reset_clears_documents() {
    let h = make_harness();
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    router
        .clone()
        .oneshot(upload_request("s1", "geo.txt", "Paris is the capital of France."))
        .await
        .unwrap();

    let resp = router.clone().oneshot(delete("/reset/s1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router.oneshot(get("/document/s1")).await.unwrap();
    let stats: DocumentStatsResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(stats.vector_count, 0);
}

#[tokio::test]
async fn test_reset_unknown_session_is_bad_request() {
    let h = make_harness();
    let resp = create_router(h.state)
        .oneshot(delete("/reset/ghost"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// /ask
// =============================================================================

#[tokio::test]
async fn test_ask_chat_streams_plain_text() {
    let h = make_harness();
    h.chat.push_stream_tokens(vec!["hello ", "from ", "chat"]);
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    let resp = router
        .oneshot(post_json(
            "/ask",
            r#"{"sessionId":"s1","question":"say hello","mode":"chat"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let body = body_bytes(resp).await;
    assert_eq!(String::from_utf8(body).unwrap(), "hello from chat");
}

#[tokio::test]
async fn test_ask_unknown_mode_is_bad_request() {
    let h = make_harness();
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    let resp = router
        .oneshot(post_json(
            "/ask",
            r#"{"sessionId":"s1","question":"q","mode":"turbo"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["message"].as_str().unwrap().contains("turbo"));
}

#[tokio::test]
async fn test_ask_empty_question_is_bad_request() {
    let h = make_harness();
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    let resp = router
        .oneshot(post_json(
            "/ask",
            r#"{"sessionId":"s1","question":"  ","mode":"chat"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ask_uninitialized_session_is_bad_request() {
    let h = make_harness();
    let resp = create_router(h.state)
        .oneshot(post_json(
            "/ask",
            r#"{"sessionId":"ghost","question":"q","mode":"chat"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ask_rag_end_to_end_with_uploaded_document() {
    let h = make_harness();
    h.utility.push_completion("What is the capital of France?");
    h.chat.push_stream_tokens(vec!["Paris."]);
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    router
        .clone()
        .oneshot(upload_request(
            "s1",
            "geo.txt",
            "Paris is the capital of France. Berlin is the capital of Germany.",
        ))
        .await
        .unwrap();

    let resp = router
        .oneshot(post_json(
            "/ask",
            r#"{"sessionId":"s1","question":"What is the capital of France?","mode":"rag"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let answer = String::from_utf8(body_bytes(resp).await).unwrap();
    assert_eq!(answer, "Paris.");
}

#[tokio::test]
async fn test_ask_web_degrades_on_search_failure() {
    let h = make_harness();
    h.utility.push_completion("Tesla latest news 2024");
    h.search.push_error("rate limited");
    h.chat.push_stream_tokens(vec!["Search is unavailable."]);
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    // A provider outage still yields a 200 streamed answer.
    let resp = router
        .oneshot(post_json(
            "/ask",
            r#"{"sessionId":"s1","question":"latest Tesla news?","mode":"web"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let answer = String::from_utf8(body_bytes(resp).await).unwrap();
    assert_eq!(answer, "Search is unavailable.");
}

// =============================================================================
// /history
// =============================================================================

#[tokio::test]
async fn test_history_records_conversation() {
    let h = make_harness();
    h.chat.push_stream_tokens(vec!["the answer"]);
    let router = create_router(h.state);
    init_session(&router, "s1").await;

    let resp = router
        .clone()
        .oneshot(post_json(
            "/ask",
            r#"{"sessionId":"s1","question":"the question","mode":"chat"}"#,
        ))
        .await
        .unwrap();
    // Drain the stream so the assistant turn gets recorded.
    body_bytes(resp).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let resp = router.oneshot(get("/history/s1")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "human");
    assert_eq!(messages[0]["content"], "the question");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "the answer");
}

#[tokio::test]
async fn test_history_unknown_session_is_bad_request() {
    let h = make_harness();
    let resp = create_router(h.state)
        .oneshot(get("/history/ghost"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Namespace isolation across sessions
// =============================================================================

#[tokio::test]
async fn test_sessions_are_isolated() {
    let h = make_harness();
    let router = create_router(h.state);
    init_session(&router, "s1").await;
    init_session(&router, "s2").await;

    router
        .clone()
        .oneshot(upload_request("s1", "a.txt", "Only session one has this."))
        .await
        .unwrap();

    let resp = router.clone().oneshot(get("/document/s1")).await.unwrap();
    let s1: DocumentStatsResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(s1.vector_count, 1);

    let resp = router.oneshot(get("/document/s2")).await.unwrap();
    let s2: DocumentStatsResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(s2.vector_count, 0);
}
