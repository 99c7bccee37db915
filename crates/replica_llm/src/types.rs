//! Prompt and generation types shared by every service implementation.

use serde::{Deserialize, Serialize};

/// Message role in a prompt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One piece of message content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text { text: String },
    /// Base64-encoded image attachment
    Image { media_type: String, data: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// PNG attachment from base64 data.
    pub fn png(data: impl Into<String>) -> Self {
        Self::Image {
            media_type: "image/png".to_string(),
            data: data.into(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { .. } => None,
        }
    }
}

/// A single prompt message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub parts: Vec<ContentPart>,
}

impl PromptMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            parts: vec![ContentPart::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            parts: vec![ContentPart::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// Append an extra content part.
    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.parts.push(part);
        self
    }

    /// All text parts joined by newlines.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of image attachments.
    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, ContentPart::Image { .. }))
            .count()
    }
}

/// A generation request.
///
/// `label` identifies the caller ("planner", "worker-2", "compose", ...) in
/// logs and usage records; providers ignore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub label: String,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            messages: Vec::new(),
            max_tokens: 16_000,
            temperature: 0.0,
        }
    }

    pub fn message(mut self, message: PromptMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// The system prompt, if any.
    pub fn system_prompt(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == PromptRole::System)
            .map(PromptMessage::text)
    }
}

/// Generated text plus usage info
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Generation {
    pub content: String,
    /// The provider stopped because it hit the output limit.
    pub truncated: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
}

impl Generation {
    pub fn complete(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            truncated: false,
            input_tokens: 0,
            output_tokens: 0,
            model: model.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_skips_images() {
        let message = PromptMessage::user("first")
            .with_part(ContentPart::png("AAAA"))
            .with_part(ContentPart::text("second"));

        assert_eq!(message.text(), "first\nsecond");
        assert_eq!(message.image_count(), 1);
    }

    #[test]
    fn test_request_builder() {
        let request = GenerationRequest::new("worker-1")
            .message(PromptMessage::system("be precise"))
            .message(PromptMessage::user("go"))
            .max_tokens(2048);

        assert_eq!(request.max_tokens, 2048);
        assert_eq!(request.system_prompt().as_deref(), Some("be precise"));
    }

    #[test]
    fn test_content_part_serialization() {
        let json = serde_json::to_value(ContentPart::png("abc")).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["media_type"], "image/png");
    }
}
