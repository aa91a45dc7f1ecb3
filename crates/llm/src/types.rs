//! Typed chat messages. Payloads stay typed until the HTTP boundary, where
//! they are encoded into the provider's wire shape.

use base64::Engine;
use serde::{Deserialize, Serialize};

use mew_domain::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Per-bot LLM endpoint configuration (from the bot's config blob).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
}

impl LlmConfig {
    /// Normalize, applying the OpenAI defaults for empty fields.
    pub fn normalized(mut self) -> Result<Self> {
        self.base_url = self.base_url.trim().trim_end_matches('/').to_owned();
        if self.base_url.is_empty() {
            self.base_url = DEFAULT_BASE_URL.to_owned();
        }
        self.model = self.model.trim().to_owned();
        if self.model.is_empty() {
            self.model = DEFAULT_MODEL.to_owned();
        }
        self.api_key = self.api_key.trim().to_owned();
        if self.api_key.is_empty() {
            return Err(Error::Config("llm api_key is required".into()));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Message content: plain text, or mixed text/image parts for multimodal
/// user turns.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
}

impl ContentPart {
    /// Wrap raw image bytes as a base64 data URL part.
    pub fn image_bytes(content_type: &str, data: &[u8]) -> ContentPart {
        let mime = if content_type.trim().is_empty() { "image/png" } else { content_type.trim() };
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        ContentPart::ImageUrl { url: format!("data:{mime};base64,{encoded}") }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, content: MessageContent::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self { role: Role::User, content: MessageContent::Parts(parts) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    /// All text carried by the message, ignoring images.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Encode one message into the OpenAI wire shape.
pub fn message_to_wire(msg: &ChatMessage) -> serde_json::Value {
    match &msg.content {
        MessageContent::Text(text) => serde_json::json!({
            "role": msg.role.as_str(),
            "content": text,
        }),
        MessageContent::Parts(parts) => {
            let wire_parts: Vec<serde_json::Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => serde_json::json!({
                        "type": "text",
                        "text": text,
                    }),
                    ContentPart::ImageUrl { url } => serde_json::json!({
                        "type": "image_url",
                        "image_url": { "url": url },
                    }),
                })
                .collect();
            serde_json::json!({
                "role": msg.role.as_str(),
                "content": wire_parts,
            })
        }
    }
}
