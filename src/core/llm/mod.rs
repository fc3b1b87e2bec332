//! LLM Client Module
//!
//! Provider abstraction for streamed text generation and token counting.
//!
//! # Module Structure
//!
//! - `provider`: the `LLMProvider` trait
//! - `types`: messages, requests and streamed chunks
//! - `error`: `LLMError` and its coarse classification
//! - `providers`: concrete provider implementations

pub mod error;
pub mod provider;
pub mod providers;
pub mod types;

pub use error::{LLMError, ProviderErrorKind, Result};
pub use provider::LLMProvider;
pub use providers::*;
pub use types::{ChatChunk, ChatMessage, ChatRequest, MessageRole, TokenUsage};
