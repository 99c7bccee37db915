//! Service traits consumed by the orchestration engine.

use async_trait::async_trait;

use crate::error::LlmResult;
use crate::types::{Generation, GenerationRequest};

/// A text generation service that accepts multimodal prompts.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Issue one generation call.
    async fn generate(&self, request: &GenerationRequest) -> LlmResult<Generation>;

    /// Resume a truncated generation. `prior` is everything emitted so far;
    /// the returned content is only the remainder.
    async fn continue_generation(
        &self,
        request: &GenerationRequest,
        prior: &str,
    ) -> LlmResult<Generation>;

    /// Model identifier used for usage records.
    fn model(&self) -> &str;
}

/// A service that rewrites a single file to fix a reported error.
#[async_trait]
pub trait RepairService: Send + Sync {
    /// Return the corrected content of `path`.
    async fn repair(&self, path: &str, content: &str, error: &str) -> LlmResult<String>;
}
