//! LLM Error Types
//!
//! Defines error types for provider operations and the coarse classification
//! the generation layer reports to users.

use serde::{Deserialize, Serialize};

/// Errors that can occur during provider operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Stream canceled")]
    StreamCanceled,
}

/// Coarse cause of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorKind {
    /// Transport failures, timeouts, throttling and server-side errors.
    Network,
    /// The credential was rejected.
    Auth,
    Unknown,
}

impl LLMError {
    /// Classify this error for reporting.
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            LLMError::HttpError(_) | LLMError::Timeout => ProviderErrorKind::Network,
            LLMError::AuthError(_) => ProviderErrorKind::Auth,
            LLMError::ApiError { status, message } => classify_status(*status, message),
            LLMError::InvalidResponse(_)
            | LLMError::NotConfigured(_)
            | LLMError::SerializationError(_)
            | LLMError::StreamCanceled => ProviderErrorKind::Unknown,
        }
    }
}

fn classify_status(status: u16, message: &str) -> ProviderErrorKind {
    if status == 401 || status == 403 || is_invalid_key_message(message) {
        ProviderErrorKind::Auth
    } else if status == 408 || status == 429 || status >= 500 {
        ProviderErrorKind::Network
    } else {
        ProviderErrorKind::Unknown
    }
}

/// Gemini rejects bad keys with a 400 and one of these markers in the body.
pub(crate) fn is_invalid_key_message(message: &str) -> bool {
    message.contains("API key not valid") || message.contains("API_KEY_INVALID")
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, LLMError>;
