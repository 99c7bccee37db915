//! LLM adapter for generation and repair calls.
//!
//! Supports OpenAI-compatible chat completions (OpenAI, OpenRouter) and the
//! Anthropic Messages API, selected via environment variables.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LlmError, LlmResult};
use crate::service::{GenerationService, RepairService};
use crate::types::{ContentPart, Generation, GenerationRequest, PromptMessage, PromptRole};

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";

const CONTINUE_INSTRUCTION: &str = "Continue exactly where your previous reply stopped. \
Do not repeat anything you already wrote and do not add any preamble.";

const REPAIR_SYSTEM_PROMPT: &str = r#"You fix a single source file of a Next.js (App Router, TypeScript, Tailwind CSS) project.

You receive the file path, its complete content and the error reported by the dev server.
Return the COMPLETE corrected file content and nothing else: no explanations, no markdown fences.
Keep the visual output identical; change only what is needed to remove the error."#;

/// LLM provider type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    /// Any OpenAI-compatible chat completions endpoint
    OpenAI,
    Anthropic,
}

/// LLM adapter that handles API calls
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: String,
    model: String,
    base_url: String,
    max_attempts: u32,
    repair_max_tokens: u32,
    client: reqwest::Client,
}

impl LlmAdapter {
    /// Create a new LLM adapter with explicit configuration
    pub fn new(provider: LlmProvider, api_key: String, model: Option<String>) -> Self {
        let default_model = match provider {
            LlmProvider::OpenAI => "gpt-4.1".to_string(),
            LlmProvider::Anthropic => "claude-sonnet-4-20250514".to_string(),
        };
        let base_url = match provider {
            LlmProvider::OpenAI => OPENAI_BASE_URL.to_string(),
            LlmProvider::Anthropic => ANTHROPIC_BASE_URL.to_string(),
        };

        Self {
            provider,
            api_key,
            model: model.unwrap_or(default_model),
            base_url,
            max_attempts: 1,
            repair_max_tokens: 16_000,
            client: reqwest::Client::new(),
        }
    }

    /// Create an LLM adapter from environment variables
    ///
    /// Checks in order:
    /// 1. OPENROUTER_API_KEY (OpenAI-compatible, OpenRouter base URL)
    /// 2. OPENAI_API_KEY
    /// 3. ANTHROPIC_API_KEY
    ///
    /// `REPLICA_LLM_MODEL` overrides the model, `REPLICA_LLM_BASE_URL` the endpoint.
    pub fn from_env() -> LlmResult<Self> {
        let custom_model = non_empty_env("REPLICA_LLM_MODEL");
        let custom_base = non_empty_env("REPLICA_LLM_BASE_URL");

        let adapter = if let Some(api_key) = non_empty_env("OPENROUTER_API_KEY") {
            Self::new(
                LlmProvider::OpenAI,
                api_key,
                Some(custom_model.unwrap_or_else(|| "anthropic/claude-sonnet-4".to_string())),
            )
            .with_base_url(OPENROUTER_BASE_URL)
        } else if let Some(api_key) = non_empty_env("OPENAI_API_KEY") {
            Self::new(LlmProvider::OpenAI, api_key, custom_model)
        } else if let Some(api_key) = non_empty_env("ANTHROPIC_API_KEY") {
            Self::new(LlmProvider::Anthropic, api_key, custom_model)
        } else {
            return Err(LlmError::NotConfigured);
        };

        Ok(match custom_base {
            Some(base) => adapter.with_base_url(base),
            None => adapter,
        })
    }

    /// Override the API base URL (no trailing slash needed).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Attempts per call for rate limits and server errors (minimum 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }

    pub fn with_repair_max_tokens(mut self, max_tokens: u32) -> Self {
        self.repair_max_tokens = max_tokens;
        self
    }

    /// Get the current provider
    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn complete(&self, request: &GenerationRequest, prior: Option<&str>) -> LlmResult<Generation> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s, ...
                let delay = Duration::from_secs(1 << attempt);
                tokio::time::sleep(delay).await;
            }

            let result = match self.provider {
                LlmProvider::OpenAI => self.complete_openai(request, prior).await,
                LlmProvider::Anthropic => self.complete_anthropic(request, prior).await,
            };

            match result {
                Ok(generation) => {
                    debug!(
                        label = %request.label,
                        input_tokens = generation.input_tokens,
                        output_tokens = generation.output_tokens,
                        truncated = generation.truncated,
                        "LLM call completed"
                    );
                    return Ok(generation);
                }
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    warn!(
                        label = %request.label,
                        "LLM call failed (attempt {}/{}): {}",
                        attempt + 1,
                        self.max_attempts,
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::EmptyResponse(self.provider_name().to_string())))
    }

    fn provider_name(&self) -> &'static str {
        match self.provider {
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Anthropic => "Anthropic",
        }
    }

    // OpenAI chat completion
    async fn complete_openai(&self, request: &GenerationRequest, prior: Option<&str>) -> LlmResult<Generation> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages: Vec<OpenAIMessage> = request.messages.iter().map(OpenAIMessage::from).collect();
        if let Some(prior) = prior {
            messages.push(OpenAIMessage::from(&PromptMessage::assistant(prior)));
            messages.push(OpenAIMessage::from(&PromptMessage::user(CONTINUE_INSTRUCTION)));
        }

        let body = OpenAIRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens),
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: "OpenAI".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let result: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::EmptyResponse("OpenAI".to_string()))?;

        let (input_tokens, output_tokens) = result
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        Ok(Generation {
            content: choice.message.content.unwrap_or_default(),
            truncated: choice.finish_reason.as_deref() == Some("length"),
            input_tokens,
            output_tokens,
            model: result.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    // Anthropic messages
    async fn complete_anthropic(&self, request: &GenerationRequest, prior: Option<&str>) -> LlmResult<Generation> {
        let url = format!("{}/messages", self.base_url);

        // Anthropic requires system message to be separate
        let system = request.system_prompt();

        let mut messages: Vec<AnthropicMessage> = request
            .messages
            .iter()
            .filter(|m| m.role != PromptRole::System)
            .map(AnthropicMessage::from)
            .collect();
        if let Some(prior) = prior {
            // Assistant prefill resumes the same turn; trailing whitespace is rejected.
            messages.push(AnthropicMessage::from(&PromptMessage::assistant(prior.trim_end())));
        }

        let body = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system,
            messages,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: "Anthropic".to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let result: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content: String = result
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() && result.stop_reason.as_deref() != Some("max_tokens") {
            return Err(LlmError::EmptyResponse("Anthropic".to_string()));
        }

        let (input_tokens, output_tokens) = result
            .usage
            .map(|u| (u.input_tokens, u.output_tokens))
            .unwrap_or((0, 0));

        Ok(Generation {
            content,
            truncated: result.stop_reason.as_deref() == Some("max_tokens"),
            input_tokens,
            output_tokens,
            model: self.model.clone(),
        })
    }
}

#[async_trait]
impl GenerationService for LlmAdapter {
    async fn generate(&self, request: &GenerationRequest) -> LlmResult<Generation> {
        self.complete(request, None).await
    }

    async fn continue_generation(
        &self,
        request: &GenerationRequest,
        prior: &str,
    ) -> LlmResult<Generation> {
        self.complete(request, Some(prior)).await
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl RepairService for LlmAdapter {
    async fn repair(&self, path: &str, content: &str, error: &str) -> LlmResult<String> {
        let request = GenerationRequest::new("repair")
            .message(PromptMessage::system(REPAIR_SYSTEM_PROMPT))
            .message(PromptMessage::user(format!(
                "## File: {}\n\n{}\n\n## Error:\n{}",
                path, content, error
            )))
            .max_tokens(self.repair_max_tokens);

        let generation = self.complete(&request, None).await?;
        let fixed = strip_code_fences(&generation.content);
        if fixed.trim().is_empty() {
            return Err(LlmError::EmptyResponse(self.provider_name().to_string()));
        }
        Ok(fixed)
    }
}

/// Remove a surrounding markdown code fence (with optional language tag).
pub fn strip_code_fences(content: &str) -> String {
    let trimmed = content.trim();
    let without_open = match trimmed.strip_prefix("```") {
        Some(rest) => match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        },
        None => trimmed,
    };
    let without_close = without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open);
    format!("{}\n", without_close.trim_end())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: Vec<OpenAIContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAIContent {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Serialize)]
struct OpenAIImageUrl {
    url: String,
}

impl From<&PromptMessage> for OpenAIMessage {
    fn from(message: &PromptMessage) -> Self {
        let role = match message.role {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        };
        let content = message
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => OpenAIContent::Text { text: text.clone() },
                ContentPart::Image { media_type, data } => OpenAIContent::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: format!("data:{};base64,{}", media_type, data),
                    },
                },
            })
            .collect();
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContent {
    Text { text: String },
    Image { source: AnthropicImageSource },
}

#[derive(Debug, Serialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

impl From<&PromptMessage> for AnthropicMessage {
    fn from(message: &PromptMessage) -> Self {
        let role = match message.role {
            PromptRole::Assistant => "assistant",
            PromptRole::User | PromptRole::System => "user",
        };
        let content = message
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => AnthropicContent::Text { text: text.clone() },
                ContentPart::Image { media_type, data } => AnthropicContent::Image {
                    source: AnthropicImageSource {
                        kind: "base64".to_string(),
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                },
            })
            .collect();
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseContent>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponseContent {
    text: Option<String>,
}
