//! Scripted generation service for testing.
//!
//! Provides a configurable implementation of [`GenerationService`] and
//! [`RepairService`] that returns canned replies, routed by request label,
//! and records every call for later verification.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{LlmError, LlmResult};
use crate::service::{GenerationService, RepairService};
use crate::types::{Generation, GenerationRequest};

/// Predefined reply for a call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful generation
    Text { content: String, truncated: bool },
    /// Call fails with the given message
    Fail(String),
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            truncated: false,
        }
    }

    /// A reply cut off at the output limit.
    pub fn truncated(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            truncated: true,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// "generate", "continue" or "repair"
    pub method: String,
    pub label: String,
    /// All text parts of the prompt, joined
    pub text: String,
    pub image_count: usize,
    /// Prior output passed to a continuation call
    pub prior: Option<String>,
}

/// Scripted generation service for testing.
///
/// Replies are matched by label prefix first (`on_label("worker-2", ..)`),
/// then taken from the default queue. The last reply of a queue is sticky:
/// it is returned again once the queue would otherwise run dry.
#[derive(Clone)]
pub struct ScriptedGenerator {
    model: String,
    routes: Arc<RwLock<Vec<(String, VecDeque<MockReply>)>>>,
    default_replies: Arc<RwLock<VecDeque<MockReply>>>,
    repairs: Arc<RwLock<VecDeque<MockReply>>>,
    captured: Arc<RwLock<Vec<CapturedRequest>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            model: "scripted-model".to_string(),
            routes: Arc::new(RwLock::new(Vec::new())),
            default_replies: Arc::new(RwLock::new(VecDeque::new())),
            repairs: Arc::new(RwLock::new(VecDeque::new())),
            captured: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(None)),
        }
    }

    /// Queue a reply for requests whose label starts with `prefix`.
    pub fn on_label(self, prefix: impl Into<String>, reply: MockReply) -> Self {
        let prefix = prefix.into();
        {
            let mut routes = self.routes.write();
            match routes.iter_mut().find(|(p, _)| *p == prefix) {
                Some((_, queue)) => queue.push_back(reply),
                None => routes.push((prefix, VecDeque::from(vec![reply]))),
            }
        }
        self
    }

    /// Queue a reply for any label without a dedicated route.
    pub fn add_reply(self, reply: MockReply) -> Self {
        self.default_replies.write().push_back(reply);
        self
    }

    /// Queue a reply for `repair` calls.
    pub fn add_repair(self, reply: MockReply) -> Self {
        self.repairs.write().push_back(reply);
        self
    }

    /// Delay every call, to exercise concurrency.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.write() = Some(delay);
        self
    }

    /// Get all captured calls.
    pub fn calls(&self) -> Vec<CapturedRequest> {
        self.captured.read().clone()
    }

    /// Calls whose label starts with `prefix`.
    pub fn calls_for(&self, prefix: &str) -> Vec<CapturedRequest> {
        self.captured
            .read()
            .iter()
            .filter(|c| c.label.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.captured.read().len()
    }

    fn record(&self, method: &str, request: &GenerationRequest, prior: Option<&str>) {
        self.captured.write().push(CapturedRequest {
            method: method.to_string(),
            label: request.label.clone(),
            text: request
                .messages
                .iter()
                .map(|m| m.text())
                .collect::<Vec<_>>()
                .join("\n"),
            image_count: request.messages.iter().map(|m| m.image_count()).sum(),
            prior: prior.map(str::to_string),
        });
    }

    fn next_reply(&self, label: &str) -> MockReply {
        {
            let mut routes = self.routes.write();
            // Longest matching prefix wins so "worker-1" does not shadow "worker-10".
            let best = routes
                .iter_mut()
                .filter(|(prefix, queue)| label.starts_with(prefix.as_str()) && !queue.is_empty())
                .max_by_key(|(prefix, _)| prefix.len());
            if let Some((_, queue)) = best {
                return pop_sticky(queue);
            }
        }
        let mut defaults = self.default_replies.write();
        if defaults.is_empty() {
            return MockReply::fail(format!("no scripted reply for '{}'", label));
        }
        pop_sticky(&mut defaults)
    }

    async fn pause(&self) {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn into_generation(&self, reply: MockReply) -> LlmResult<Generation> {
        match reply {
            MockReply::Text { content, truncated } => Ok(Generation {
                output_tokens: (content.len() / 4) as u64,
                input_tokens: 100,
                content,
                truncated,
                model: self.model.clone(),
            }),
            MockReply::Fail(message) => Err(LlmError::Scripted(message)),
        }
    }
}

fn pop_sticky(queue: &mut VecDeque<MockReply>) -> MockReply {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or_else(|| MockReply::fail("empty queue"))
    } else {
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| MockReply::fail("empty queue"))
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> LlmResult<Generation> {
        self.record("generate", request, None);
        self.pause().await;
        let reply = self.next_reply(&request.label);
        self.into_generation(reply)
    }

    async fn continue_generation(
        &self,
        request: &GenerationRequest,
        prior: &str,
    ) -> LlmResult<Generation> {
        self.record("continue", request, Some(prior));
        self.pause().await;
        let reply = self.next_reply(&request.label);
        self.into_generation(reply)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl RepairService for ScriptedGenerator {
    async fn repair(&self, path: &str, content: &str, error: &str) -> LlmResult<String> {
        let request = GenerationRequest::new("repair").message(crate::types::PromptMessage::user(
            format!("{}\n{}\n{}", path, content, error),
        ));
        self.record("repair", &request, None);
        self.pause().await;
        let reply = {
            let mut repairs = self.repairs.write();
            if repairs.is_empty() {
                MockReply::fail("no scripted repair")
            } else {
                pop_sticky(&mut repairs)
            }
        };
        match reply {
            MockReply::Text { content, .. } => Ok(content),
            MockReply::Fail(message) => Err(LlmError::Scripted(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PromptMessage;

    fn request(label: &str) -> GenerationRequest {
        GenerationRequest::new(label).message(PromptMessage::user("hello"))
    }

    #[tokio::test]
    async fn test_routes_by_longest_prefix() {
        let generator = ScriptedGenerator::new()
            .on_label("worker-1", MockReply::text("one"))
            .on_label("worker-10", MockReply::text("ten"))
            .add_reply(MockReply::text("default"));

        assert_eq!(generator.generate(&request("worker-10")).await.unwrap().content, "ten");
        assert_eq!(generator.generate(&request("worker-1")).await.unwrap().content, "one");
        assert_eq!(generator.generate(&request("compose")).await.unwrap().content, "default");
    }

    #[tokio::test]
    async fn test_queue_is_sticky_at_the_end() {
        let generator = ScriptedGenerator::new()
            .add_reply(MockReply::fail("first"))
            .add_reply(MockReply::text("second"));

        assert!(generator.generate(&request("x")).await.is_err());
        assert_eq!(generator.generate(&request("x")).await.unwrap().content, "second");
        assert_eq!(generator.generate(&request("x")).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_captures_continuations() {
        let generator = ScriptedGenerator::new().add_reply(MockReply::text("rest"));
        generator
            .continue_generation(&request("worker-2"), "prior output")
            .await
            .unwrap();

        let calls = generator.calls_for("worker-2");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "continue");
        assert_eq!(calls[0].prior.as_deref(), Some("prior output"));
    }

    #[tokio::test]
    async fn test_repair_without_script_fails() {
        let generator = ScriptedGenerator::new();
        assert!(generator.repair("a.tsx", "x", "boom").await.is_err());

        let generator = ScriptedGenerator::new().add_repair(MockReply::text("fixed"));
        assert_eq!(generator.repair("a.tsx", "x", "boom").await.unwrap(), "fixed");
    }
}
