//! Generation error taxonomy.

use crate::core::llm::{LLMError, ProviderErrorKind};

/// Input problems caught before any provider call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter some context or an issue description.")]
    EmptyContext,

    #[error("Please select at least one output format.")]
    NoFormats,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Credential rejected; the provider's message is kept verbatim.
    #[error("The provided AI API key is not valid: {0}")]
    ProviderAuth(String),

    #[error("A network error occurred. Please check your connection and try again. ({0})")]
    ProviderNetwork(String),

    #[error("Failed to get a response from the AI API. Please try again later. ({0})")]
    ProviderUnknown(String),

    #[error("A generation run is already in progress")]
    AlreadyRunning,

    #[error("Generation run was cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Provider cause, for provider failures only
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            GenerationError::ProviderAuth(_) => Some(ProviderErrorKind::Auth),
            GenerationError::ProviderNetwork(_) => Some(ProviderErrorKind::Network),
            GenerationError::ProviderUnknown(_) => Some(ProviderErrorKind::Unknown),
            _ => None,
        }
    }
}

impl From<LLMError> for GenerationError {
    fn from(err: LLMError) -> Self {
        let message = match &err {
            LLMError::AuthError(message) => message.clone(),
            LLMError::ApiError { message, .. } => message.clone(),
            other => other.to_string(),
        };
        match err.kind() {
            ProviderErrorKind::Auth => GenerationError::ProviderAuth(message),
            ProviderErrorKind::Network => GenerationError::ProviderNetwork(message),
            ProviderErrorKind::Unknown => GenerationError::ProviderUnknown(message),
        }
    }
}

pub type GenerationResult<T> = Result<T, GenerationError>;
