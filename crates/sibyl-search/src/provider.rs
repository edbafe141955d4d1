//! Search provider trait and the SerpAPI-style HTTP implementation.
//!
//! Providers return raw result text; normalization of structured JSON into
//! plain text happens here so downstream stages only ever see strings.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use sibyl_core::config::SearchConfig;
use sibyl_core::error::{Result, SibylError};

/// External web-search collaborator.
///
/// Failures propagate as errors here; the graceful-degradation policy lives
/// in the web-search pipeline stage, not in the provider.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run a search and return normalized result text.
    async fn search(&self, query: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// HttpSearchProvider
// ---------------------------------------------------------------------------

/// SerpAPI-style GET provider (`?q=...&api_key=...`).
pub struct HttpSearchProvider {
    client: reqwest::Client,
    config: SearchConfig,
}

impl HttpSearchProvider {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SibylError::Config(format!("search http client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search(&self, query: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.config.api_url)
            .query(&[("q", query), ("api_key", &self.config.api_key)])
            .send()
            .await
            .map_err(|e| SibylError::Search(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SibylError::Search(format!(
                "provider returned status {}",
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SibylError::Search(format!("invalid response body: {}", e)))?;

        Ok(normalize_results(&body))
    }
}

/// Flatten a provider response into plain text.
///
/// Prefers the answer box, then organic results (title + snippet + link);
/// anything else is serialized verbatim. Strings pass through untouched.
pub fn normalize_results(body: &Value) -> String {
    if let Value::String(s) = body {
        return s.clone();
    }

    let mut sections: Vec<String> = Vec::new();

    if let Some(answer) = body
        .get("answer_box")
        .and_then(|b| b.get("answer").or_else(|| b.get("snippet")))
        .and_then(Value::as_str)
    {
        sections.push(format!("Answer: {}", answer));
    }

    if let Some(results) = body.get("organic_results").and_then(Value::as_array) {
        for result in results {
            let title = result.get("title").and_then(Value::as_str).unwrap_or("");
            let snippet = result.get("snippet").and_then(Value::as_str).unwrap_or("");
            let link = result.get("link").and_then(Value::as_str).unwrap_or("");
            if !title.is_empty() || !snippet.is_empty() {
                sections.push(format!("{}\n{}\n{}", title, snippet, link));
            }
        }
    }

    if sections.is_empty() {
        // Unknown shape: serialize so generation still sees something.
        serde_json::to_string_pretty(body).unwrap_or_default()
    } else {
        sections.join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// MockSearchProvider - scripted results for tests
// ---------------------------------------------------------------------------

/// Scriptable search provider counting calls.
#[derive(Default)]
pub struct MockSearchProvider {
    results: Mutex<VecDeque<Result<String>>>,
    calls: AtomicUsize,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_result(&self, text: impl Into<String>) {
        self.results.lock().unwrap().push_back(Ok(text.into()));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.results
            .lock()
            .unwrap()
            .push_back(Err(SibylError::Search(message.into())));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, _query: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("mock search results".to_string()))
    }
}
