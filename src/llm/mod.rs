//! Reasoning-service integration for risk scoring.
//!
//! Defines the `ReasoningService` trait, the Groq chat-completions client,
//! and the JSON object extractor used to pull structured answers out of
//! free-text completions.

pub mod extract;
pub mod groq;

use anyhow::Result;
use async_trait::async_trait;

/// Abstraction over a text-in, text-out language model.
///
/// Implementors return the raw completion; interpreting it is the risk
/// engine's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Send one prompt and return the completion text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}
