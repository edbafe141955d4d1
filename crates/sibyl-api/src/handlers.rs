//! Route handler functions for all API endpoints.
//!
//! Each handler extracts parameters via axum extractors, interacts with
//! AppState services, and returns JSON responses. The one exception is
//! `/ask`, which returns a chunked `text/plain` body fed directly by the
//! pipeline's token stream.

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use sibyl_core::types::{ConversationMessage, Mode};

use crate::error::ApiError;
use crate::split;
use crate::state::AppState;

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub session_id: String,
    pub chunks: usize,
    pub ingested: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatsResponse {
    pub session_id: String,
    pub vector_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub session_id: String,
    pub cleared: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<ConversationMessage>,
}

// =============================================================================
// Handlers
// =============================================================================

/// GET /health - liveness and uptime.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// POST /initialize - register a new session.
pub async fn initialize(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.registry().create_session(&req.session_id)?;
    Ok(Json(InitializeResponse {
        session_id: req.session_id,
    }))
}

/// POST /validate - check whether a session is initialized.
///
/// Unlike the other endpoints, an unknown session here is a 404 lookup
/// miss, not a 400 request error.
pub async fn validate(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    if state.registry().validate_session(&req.session_id)? {
        Ok(Json(ValidateResponse { valid: true }))
    } else {
        Err(ApiError::NotFound(format!(
            "Session not initialized: {}",
            req.session_id
        )))
    }
}

/// POST /upload - split an uploaded text file and ingest it into the
/// session's namespace. The session comes from the `x-session-id` header.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let session_id = headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("x-session-id header is required".to_string()))?;

    state.registry().ensure_session(&session_id)?;

    let mut chunks = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        // Only file parts are ingested; stray form fields are ignored.
        if field.file_name().is_none() && field.name() != Some("file") {
            continue;
        }
        let source = field
            .file_name()
            .or(field.name())
            .unwrap_or("upload")
            .to_string();
        let text = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(format!("file is not valid text: {}", e)))?;
        chunks.extend(split::split_text(&text, &source));
    }

    if chunks.is_empty() {
        return Err(ApiError::BadRequest(
            "upload contained no text".to_string(),
        ));
    }

    let total = chunks.len();
    let report = state.ingestion.ingest(&session_id, chunks).await?;

    Ok(Json(UploadResponse {
        session_id,
        chunks: total,
        ingested: report.ingested,
        skipped: report.skipped,
    }))
}

/// GET /document/{sessionId} - namespace stats for a session.
pub async fn document_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<DocumentStatsResponse>, ApiError> {
    let stats = state.registry().session_info(&session_id)?;
    Ok(Json(DocumentStatsResponse {
        session_id: stats.namespace,
        vector_count: stats.vector_count,
    }))
}

/// DELETE /reset/{sessionId} - clear the session's indexed documents.
pub async fn reset(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ResetResponse>, ApiError> {
    state.registry().reset_session(&session_id)?;
    Ok(Json(ResetResponse {
        session_id,
        cleared: true,
    }))
}

/// POST /ask - answer a question, streaming tokens as chunked text/plain.
///
/// The response body is fed directly by the pipeline's token stream; if the
/// client disconnects, dropping the body drops the stream and the pipeline's
/// forwarding task stops. A mid-stream upstream failure truncates the body
/// without corrupting bytes already sent.
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Response, ApiError> {
    let mode: Mode = req.mode.parse()?;
    let stream = state
        .dispatcher
        .dispatch(mode, &req.session_id, &req.question)
        .await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// GET /history/{sessionId} - the session's ordered message log.
pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    state.registry().ensure_session(&session_id)?;
    let messages = state.history.list(&session_id).await?;
    Ok(Json(HistoryResponse { messages }))
}
