//! Sandbox provider trait and types.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SandboxResult;

/// Output of a command executed inside a sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit code of the command
    pub exit_code: i64,
    /// Combined stdout and stderr
    pub output: String,
}

impl ExecOutput {
    pub fn new(exit_code: i64, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Check if the command exited with 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A compute provider hosting ephemeral environments.
///
/// Handles are opaque strings issued by `create`.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Create a new environment from `image`, exposing `port`.
    async fn create(&self, image: &str, port: u16) -> SandboxResult<String>;

    /// Write `bytes` to an absolute `path` inside the environment.
    async fn upload(&self, handle: &str, path: &str, bytes: &[u8]) -> SandboxResult<()>;

    /// Run a shell command; a timeout is an error, a non-zero exit is not.
    async fn exec(&self, handle: &str, command: &str, timeout: Duration) -> SandboxResult<ExecOutput>;

    /// Base URL reaching `port` of the environment from this process.
    async fn routable_address(&self, handle: &str, port: u16) -> SandboxResult<String>;

    /// Directory the project lives in.
    async fn project_dir(&self, handle: &str) -> SandboxResult<String>;

    /// Destroy the environment.
    async fn delete(&self, handle: &str) -> SandboxResult<()>;
}
