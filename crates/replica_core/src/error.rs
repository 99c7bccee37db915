//! Error types for the generation engine.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Capture contains no snapshots")]
    EmptyCapture,

    #[error("Nothing to compose")]
    NothingToCompose,

    #[error("Generation error: {0}")]
    Llm(#[from] replica_llm::LlmError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
