//! Error types for the engine and its HTTP surface.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Too many requests: try again in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("A clone is already running for this client")]
    Busy,

    #[error("Server is at capacity, try again later")]
    AtCapacity,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Pipeline(String),

    #[error("Core error: {0}")]
    Core(#[from] replica_core::CoreError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] replica_sandbox::SandboxError),

    #[error("Store error: {0}")]
    Store(#[from] replica_store::StoreError),

    #[error("Generation service error: {0}")]
    Llm(#[from] replica_llm::LlmError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::RateLimited { .. } | ServerError::Busy => StatusCode::TOO_MANY_REQUESTS,
            ServerError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Core(replica_core::CoreError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Store(replica_store::StoreError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        match self {
            ServerError::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}
