//! # replica_llm
//!
//! Generation and repair service adapters for Replica.
//!
//! The orchestration engine never talks to a vendor API directly. It depends on
//! two narrow traits:
//!
//! - [`GenerationService`]: one multimodal prompt in, generated text out, with a
//!   `truncated` flag when the provider stopped on its output limit and a
//!   continuation call that resumes from prior output.
//! - [`RepairService`]: a file path, its content and an error string in,
//!   corrected content out.
//!
//! [`LlmAdapter`] implements both over OpenAI-compatible endpoints (OpenAI,
//! OpenRouter) and the Anthropic Messages API. [`ScriptedGenerator`] implements
//! both with canned replies for tests.
//!
//! Token usage is tracked per session by [`UsageTracker`] for observability
//! only; it never influences control flow.

pub mod adapter;
pub mod error;
pub mod mock;
pub mod service;
pub mod types;
pub mod usage;

pub use adapter::{strip_code_fences, LlmAdapter, LlmProvider};
pub use error::{LlmError, LlmResult};
pub use mock::{CapturedRequest, MockReply, ScriptedGenerator};
pub use service::{GenerationService, RepairService};
pub use types::{ContentPart, Generation, GenerationRequest, PromptMessage, PromptRole};
pub use usage::{ModelPricing, UsageRecord, UsageSummary, UsageTracker};
