//! Groq LLM integration.
//!
//! Groq serves an OpenAI-compatible chat completions API, so this client
//! follows the same request/response shape. Requests are pinned to a low
//! temperature and a short output budget to keep answers structurally
//! stable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::ReasoningService;
use crate::config::AssessmentSettings;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

/// Ceiling for a single backoff delay (ms).
const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry number `attempt` (1-based): 1s, 2s, 4s, ... capped.
fn backoff_delay(attempt: u32) -> Duration {
    let factor = 2u64
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor).min(MAX_BACKOFF_MS))
}

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GroqClient {
    http: Client,
    api_url: String,
    api_key: SecretString,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    total_calls: AtomicU64,
}

impl GroqClient {
    pub fn new(api_key: SecretString, settings: &AssessmentSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to build Groq HTTP client")?;

        Ok(Self {
            http,
            api_url: GROQ_API_URL.to_string(),
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_retries: settings.max_retries,
            total_calls: AtomicU64::new(0),
        })
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Number of successful completions so far.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    fn build_request<'a>(&'a self, prompt: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        let request = self.build_request(prompt);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying Groq API call");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.api_url)
                .bearer_auth(self.api_key.expose_secret())
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse Groq response")?;
                        self.total_calls.fetch_add(1, Ordering::Relaxed);

                        return Ok(body
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.message)
                            .map(|m| m.content)
                            .unwrap_or_default());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, "Retryable Groq error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Groq API error {status}: {error_text}");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Groq request failed");
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        anyhow::bail!(
            "Groq API failed after {} retries: {}",
            self.max_retries,
            last_error.unwrap_or_default()
        )
    }
}

#[async_trait]
impl ReasoningService for GroqClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, "Requesting completion");
        self.call_api(prompt).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
