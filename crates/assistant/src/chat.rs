//! The reasoning loop: prompt in, tool calls round-tripped, cleaned reply
//! and final mood out.

use tokio_util::sync::CancellationToken;

use mew_domain::error::{Error, Result};
use mew_domain::util::preview;
use mew_llm::{ChatClient, ChatMessage, RetryOptions};

use crate::constants::{LOG_LLM_PREVIEW, MAX_TOOL_CALLS, TOOL_HISTORY_SEARCH, TOOL_RECORD_SEARCH};
use crate::controls::{extract_and_strip_final_mood, parse_tool_call};
use crate::memory::Mood;
use crate::tools::ToolExecutor;

/// One LLM round. Abstracted so the loop can be driven by canned outputs in
/// tests; production uses [`RetryingTransport`].
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    async fn chat(&self, cancel: &CancellationToken, messages: &[ChatMessage]) -> Result<String>;
}

/// The real transport: chat-completions with the standard retry policy.
pub struct RetryingTransport<'a> {
    pub client: &'a ChatClient,
    pub retry: &'a RetryOptions,
}

#[async_trait::async_trait]
impl ChatTransport for RetryingTransport<'_> {
    async fn chat(&self, cancel: &CancellationToken, messages: &[ChatMessage]) -> Result<String> {
        self.client.chat_with_retry(cancel, self.retry, messages).await
    }
}

/// Run the tool-call loop: up to `MAX_TOOL_CALLS` tool rounds, then the
/// response must be final. Tool errors are shown to the model, not the
/// user. Exceeding the cap is a per-message failure.
pub async fn chat_with_tools(
    cancel: &CancellationToken,
    transport: &dyn ChatTransport,
    persona_system: &str,
    first_user_prompt: &str,
    l5: Vec<ChatMessage>,
    tools: &dyn ToolExecutor,
    channel_id: &str,
) -> Result<(String, Option<Mood>)> {
    let mut messages = Vec::with_capacity(2 + l5.len() + MAX_TOOL_CALLS * 2);
    messages.push(ChatMessage::system(persona_system.trim()));
    messages.push(ChatMessage::user(first_user_prompt.trim()));
    messages.extend(l5);

    for round in 0..=MAX_TOOL_CALLS {
        tracing::debug!(
            channel_id,
            round = round + 1,
            messages = messages.len(),
            "llm call"
        );
        let out = transport.chat(cancel, &messages).await?;
        tracing::debug!(channel_id, output = %preview(&out, LOG_LLM_PREVIEW), "llm output");

        let Some(call) = parse_tool_call(&out) else {
            let (clean, mood) = extract_and_strip_final_mood(&out);
            if let Some(mood) = &mood {
                tracing::debug!(
                    channel_id,
                    valence = mood.valence,
                    arousal = mood.arousal,
                    "final_mood parsed"
                );
            }
            return Ok((clean, mood));
        };

        // The assistant's exact text joins the conversation before the
        // result does.
        messages.push(ChatMessage::assistant(out.clone()));

        let payload = execute_tool(tools, &call).await;
        tracing::debug!(
            channel_id,
            tool = %call.tool,
            result = %preview(&payload.to_string(), LOG_LLM_PREVIEW),
            "tool result"
        );
        messages.push(ChatMessage::system(format!(
            "TOOL_RESULT ({}): {}",
            call.tool, payload
        )));
    }

    Err(Error::Llm("tool loop exceeded".into()))
}

async fn execute_tool(
    tools: &dyn ToolExecutor,
    call: &crate::controls::ToolCall,
) -> serde_json::Value {
    let str_arg = |keys: &[&str]| -> String {
        for key in keys {
            if let Some(v) = call.args.get(*key).and_then(|v| v.as_str()) {
                if !v.trim().is_empty() {
                    return v.trim().to_owned();
                }
            }
        }
        String::new()
    };

    let result = match call.tool.as_str() {
        TOOL_HISTORY_SEARCH => tools.history_search(&str_arg(&["keyword", "query"])).await,
        TOOL_RECORD_SEARCH => tools.record_search(&str_arg(&["record_id", "recordId"])).await,
        other => Err(Error::NotFound(format!("unknown tool: {other}"))),
    };

    match result {
        Ok(payload) => payload,
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct ScriptedLlm {
        outputs: Mutex<Vec<String>>,
        seen_messages: Mutex<Vec<usize>>,
    }

    impl ScriptedLlm {
        fn new(outputs: &[&str]) -> Self {
            Self {
                outputs: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
                seen_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for ScriptedLlm {
        async fn chat(
            &self,
            _cancel: &CancellationToken,
            messages: &[ChatMessage],
        ) -> Result<String> {
            self.seen_messages.lock().push(messages.len());
            let mut outputs = self.outputs.lock();
            if outputs.is_empty() {
                return Err(Error::Llm("script exhausted".into()));
            }
            Ok(outputs.remove(0))
        }
    }

    struct StubTools;

    #[async_trait::async_trait]
    impl ToolExecutor for StubTools {
        async fn history_search(&self, keyword: &str) -> Result<serde_json::Value> {
            Ok(json!({ "keyword": keyword, "messages": [] }))
        }

        async fn record_search(&self, record_id: &str) -> Result<serde_json::Value> {
            if record_id == "missing" {
                return Err(Error::NotFound("record not found".into()));
            }
            Ok(json!({ "recordId": record_id, "text": "[empty]" }))
        }
    }

    #[tokio::test]
    async fn plain_reply_passes_through() {
        let llm = ScriptedLlm::new(&["hello there\nfinal_mood: {\"valence\":0.3,\"arousal\":0.1}"]);
        let (reply, mood) = chat_with_tools(
            &CancellationToken::new(),
            &llm,
            "persona",
            "l1l4",
            vec![ChatMessage::user("hi")],
            &StubTools,
            "C1",
        )
        .await
        .unwrap();
        assert_eq!(reply, "hello there");
        assert!((mood.unwrap().valence - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn tool_round_feeds_result_back() {
        let llm = ScriptedLlm::new(&[
            "TOOL_CALL: {\"tool\":\"HistorySearch\",\"args\":{\"keyword\":\"tea\"}}",
            "found nothing about tea",
        ]);
        let (reply, mood) = chat_with_tools(
            &CancellationToken::new(),
            &llm,
            "persona",
            "l1l4",
            vec![],
            &StubTools,
            "C1",
        )
        .await
        .unwrap();
        assert_eq!(reply, "found nothing about tea");
        assert!(mood.is_none());
        // Second round saw the assistant text + tool result appended.
        let counts = llm.seen_messages.lock();
        assert_eq!(*counts, vec![2, 4]);
    }

    #[tokio::test]
    async fn tool_error_becomes_payload_not_failure() {
        let llm = ScriptedLlm::new(&[
            "TOOL_CALL: {\"tool\":\"RecordSearch\",\"args\":{\"record_id\":\"missing\"}}",
            "the record is gone",
        ]);
        let (reply, _) = chat_with_tools(
            &CancellationToken::new(),
            &llm,
            "persona",
            "l1l4",
            vec![],
            &StubTools,
            "C1",
        )
        .await
        .unwrap();
        assert_eq!(reply, "the record is gone");
    }

    #[tokio::test]
    async fn four_consecutive_tool_calls_exceed_loop() {
        let tool_line = "TOOL_CALL: {\"tool\":\"HistorySearch\",\"args\":{\"keyword\":\"x\"}}";
        let llm = ScriptedLlm::new(&[tool_line, tool_line, tool_line, tool_line, tool_line]);
        let err = chat_with_tools(
            &CancellationToken::new(),
            &llm,
            "persona",
            "l1l4",
            vec![],
            &StubTools,
            "C1",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Llm(msg) if msg.contains("tool loop exceeded")));
    }

    #[tokio::test]
    async fn unknown_tool_round_trips_as_error_payload() {
        let llm = ScriptedLlm::new(&[
            "TOOL_CALL: {\"tool\":\"WeatherReport\",\"args\":{}}",
            "never mind",
        ]);
        let (reply, _) = chat_with_tools(
            &CancellationToken::new(),
            &llm,
            "persona",
            "l1l4",
            vec![],
            &StubTools,
            "C1",
        )
        .await
        .unwrap();
        assert_eq!(reply, "never mind");
    }
}
