//! LLM Provider Trait
//!
//! Defines the trait that text-generation providers implement.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::Result;
use super::types::{ChatChunk, ChatRequest};

/// Trait that all generation providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Get the provider's unique identifier
    fn id(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;

    /// Send a streaming request.
    ///
    /// Returns once the call is established; the receiver yields chunks in
    /// provider order and closes after a final chunk or an error.
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<ChatChunk>>>;

    /// Best-effort token count for `text`
    async fn count_tokens(&self, text: &str) -> Result<u32>;
}
