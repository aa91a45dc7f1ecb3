//! Chat-completions HTTP adapter.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use mew_domain::error::{Error, Result};

use crate::retry::{call_with_retry, RetryOptions};
use crate::types::{message_to_wire, ChatMessage, LlmConfig};

/// Client for one OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatClient {
    cfg: LlmConfig,
    http: reqwest::Client,
}

impl ChatClient {
    pub fn new(cfg: LlmConfig, http: reqwest::Client) -> Result<Self> {
        Ok(Self { cfg: cfg.normalized()?, http })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// One chat-completions call. Returns the first choice's content;
    /// empty choices/content surface as a transient LLM error so the retry
    /// wrapper can take another shot.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.cfg.base_url);
        let body = serde_json::json!({
            "model": self.cfg.model,
            "messages": messages.iter().map(message_to_wire).collect::<Vec<Value>>(),
        });

        tracing::debug!(url = %url, model = %self.cfg.model, messages = messages.len(), "llm chat request");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Llm(format!("reading response: {e}")))?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Auth(format!("llm rejected key: status={status}")));
        }
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "HTTP {} - {}",
                status.as_u16(),
                text.trim().chars().take(512).collect::<String>()
            )));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| Error::Llm(format!("invalid response json: {e}")))?;
        extract_first_choice(&parsed)
    }

    /// Chat with the standard retry policy.
    pub async fn chat_with_retry(
        &self,
        cancel: &CancellationToken,
        opts: &RetryOptions,
        messages: &[ChatMessage],
    ) -> Result<String> {
        call_with_retry(cancel, opts, || self.chat(messages)).await
    }
}

fn extract_first_choice(body: &Value) -> Result<String> {
    let content = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::Llm("empty choices".into()));
    }
    Ok(content.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_choice_content_extracts() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }],
            "model": "gpt-4o-mini",
        });
        assert_eq!(extract_first_choice(&body).unwrap(), "hello");
    }

    #[test]
    fn empty_choices_is_transient() {
        let err = extract_first_choice(&json!({ "choices": [] })).unwrap_err();
        assert!(err.is_transient());
        let err = extract_first_choice(&json!({
            "choices": [{ "message": { "content": "   " } }]
        }))
        .unwrap_err();
        assert!(err.is_transient());
    }
}
