//! Error types for generation and repair calls.

use thiserror::Error;

/// Result type alias for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur while calling a generation or repair service.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM not configured. Set OPENROUTER_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Failed to parse response: {0}")]
    InvalidResponse(String),

    #[error("Scripted failure: {0}")]
    Scripted(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether the error is worth a retry (rate limits, server errors, network).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
