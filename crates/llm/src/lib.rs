//! OpenAI-compatible chat-completions transport.
//!
//! Works with OpenAI and any endpoint following the same contract (Ollama,
//! vLLM, proxies). Non-streaming only; the assistant paces its replies
//! line-by-line anyway.

pub mod json;
pub mod openai;
pub mod retry;
pub mod types;

pub use json::extract_json_block;
pub use openai::ChatClient;
pub use retry::RetryOptions;
pub use types::{ChatMessage, ContentPart, LlmConfig, MessageContent, Role};
