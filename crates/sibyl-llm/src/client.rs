//! Chat-completions client: blocking completion plus SSE token streaming.
//!
//! `HttpCompletionClient` talks to an OpenAI-compatible chat completions
//! endpoint. Streaming responses arrive as SSE frames (`data: {...}`
//! terminated by `data: [DONE]`); tokens are forwarded through a bounded
//! channel so a slow consumer applies backpressure instead of growing an
//! unbounded buffer.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use sibyl_core::config::LlmConfig;
use sibyl_core::error::{Result, SibylError};

use crate::prompt::ChatPrompt;

/// A lazy, finite, non-restartable sequence of answer tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Capacity of the token forwarding channel. Bounded so streaming memory
/// stays constant regardless of answer length.
const TOKEN_CHANNEL_CAPACITY: usize = 32;

/// Completion collaborator consumed by the pipelines.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// One-shot completion; returns the full response text.
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String>;

    /// Streaming completion; yields tokens in generation order.
    async fn stream(&self, prompt: &ChatPrompt) -> Result<TokenStream>;
}

// ---------------------------------------------------------------------------
// HttpCompletionClient
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat completions client bound to one model.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

impl HttpCompletionClient {
    /// Build a client for one model using shared LLM settings.
    pub fn new(config: &LlmConfig, model: impl Into<String>, temperature: f32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SibylError::Config(format!("llm http client: {}", e)))?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: model.into(),
            temperature,
        })
    }

    fn request_body(&self, prompt: &ChatPrompt, stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": prompt.messages(),
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    async fn send(&self, prompt: &ChatPrompt, stream: bool) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, stream))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SibylError::Generation("completion request timed out".to_string())
                } else {
                    SibylError::Generation(format!("completion request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SibylError::Generation(format!(
                "provider returned status {}",
                status.as_u16()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String> {
        let response = self.send(prompt, false).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| SibylError::Generation(format!("invalid response body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SibylError::Generation("provider returned no choices".to_string()))
    }

    async fn stream(&self, prompt: &ChatPrompt) -> Result<TokenStream> {
        let response = self.send(prompt, true).await?;

        let (tx, rx) = mpsc::channel::<Result<String>>(TOKEN_CHANNEL_CAPACITY);
        let model = self.model.clone();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(Err(SibylError::Generation(format!(
                                "stream read failed: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);

                // SSE frames end with a blank line.
                while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
                    let frame: Vec<u8> = buffer.drain(..pos + 2).collect();
                    match parse_sse_frame(&frame) {
                        SseFrame::Token(token) => {
                            // Receiver dropped means the caller disconnected;
                            // stop reading from the provider.
                            if tx.send(Ok(token)).await.is_err() {
                                debug!(model = %model, "Token consumer dropped mid-stream");
                                return;
                            }
                        }
                        SseFrame::Done => return,
                        SseFrame::Empty => {}
                        SseFrame::Invalid(msg) => {
                            let _ = tx.send(Err(SibylError::Generation(msg))).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

enum SseFrame {
    Token(String),
    Done,
    Empty,
    Invalid(String),
}

/// Parse one SSE frame into a token, the `[DONE]` sentinel, or nothing.
fn parse_sse_frame(frame: &[u8]) -> SseFrame {
    let text = String::from_utf8_lossy(frame);
    let data: String = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");

    if data.is_empty() {
        return SseFrame::Empty;
    }
    if data == "[DONE]" {
        return SseFrame::Done;
    }

    match serde_json::from_str::<StreamChunk>(&data) {
        Ok(chunk) => match chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
        {
            Some(token) => SseFrame::Token(token),
            None => SseFrame::Empty,
        },
        Err(e) => SseFrame::Invalid(format!("invalid stream frame: {}", e)),
    }
}

// ---------------------------------------------------------------------------
// MockCompletionClient - scripted responses for tests
// ---------------------------------------------------------------------------

/// Scriptable completion client counting calls per method.
///
/// Streams are scripted per item, so a mid-stream failure (`Ok` tokens
/// followed by an `Err`) can be exercised as well as the happy path.
#[derive(Default)]
pub struct MockCompletionClient {
    completions: Mutex<VecDeque<Result<String>>>,
    streams: Mutex<VecDeque<Result<Vec<Result<String>>>>>,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next `complete` call.
    pub fn push_completion(&self, text: impl Into<String>) {
        self.completions
            .lock()
            .unwrap()
            .push_back(Ok(text.into()));
    }

    /// Queue a failure for the next `complete` call.
    pub fn push_completion_error(&self, message: impl Into<String>) {
        self.completions
            .lock()
            .unwrap()
            .push_back(Err(SibylError::Generation(message.into())));
    }

    /// Queue the token sequence for the next `stream` call.
    pub fn push_stream_tokens(&self, tokens: Vec<&str>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(Ok(tokens.into_iter().map(|t| Ok(t.to_string())).collect()));
    }

    /// Queue the exact item sequence for the next `stream` call, including
    /// mid-stream errors.
    pub fn push_stream_items(&self, items: Vec<Result<String>>) {
        self.streams.lock().unwrap().push_back(Ok(items));
    }

    /// Queue a failure for the next `stream` call.
    pub fn push_stream_error(&self, message: impl Into<String>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(Err(SibylError::Generation(message.into())));
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(&self, _prompt: &ChatPrompt) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("mock completion".to_string()))
    }

    async fn stream(&self, _prompt: &ChatPrompt) -> Result<TokenStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![Ok("mock ".to_string()), Ok("stream".to_string())]));

        let items = script?;
        Ok(Box::pin(tokio_stream::iter(items)))
    }
}
