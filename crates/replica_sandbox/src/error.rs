//! Error types for environment provisioning.

use thiserror::Error;

/// Result type alias for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors that can occur while creating or driving an environment.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Docker not available: {0}")]
    DockerNotAvailable(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Unknown sandbox handle: {0}")]
    UnknownHandle(String),

    #[error("No environment for session {0}")]
    NoEnvironment(String),

    #[error("Command `{command}` exited with {exit_code}: {output}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        output: String,
    },

    #[error("{0} timed out after {1} seconds")]
    Timeout(String, u64),

    #[error("Runtime not healthy after {0} probes")]
    Unhealthy(u32),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
