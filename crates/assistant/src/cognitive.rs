//! Distillation passes: fact extraction and session summarization.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use mew_domain::error::{Error, Result};
use mew_llm::{extract_json_block, ChatClient, ChatMessage, RetryOptions};

use crate::memory::facts::format_facts_for_context;
use crate::memory::FactsFile;

const FACT_SYSTEM_PROMPT: &str = "You are a fact extraction engine.\n\
Extract stable, user-specific facts from the conversation.\n\
Write each fact in the user's language (use the predominant language of the conversation).\n\
Do not translate facts into English unless the user is speaking English.\n\
Also identify which existing facts were mentioned or strongly implied (semantic match is allowed).";

const SUMMARY_SYSTEM_PROMPT: &str = "You are a conversation summarizer.\n\
Summarize the session record into 1-3 sentences, focusing on user intent, key events, and emotional tone.\n\
Return plain text only.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactEngineResult {
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub used_fact_ids: Vec<String>,
}

impl FactEngineResult {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.used_fact_ids.is_empty()
    }

    fn cleaned(mut self) -> Self {
        self.facts = self
            .facts
            .into_iter()
            .map(|f| f.trim().to_owned())
            .filter(|f| !f.is_empty())
            .collect();
        self.used_fact_ids = self
            .used_fact_ids
            .into_iter()
            .map(|id| id.trim().to_owned())
            .filter(|id| !id.is_empty())
            .collect();
        self
    }
}

/// Parse the fact engine's JSON output; a bare array of strings is accepted
/// for backward compatibility with older prompt revisions.
pub fn parse_fact_engine_output(raw: &str) -> Result<FactEngineResult> {
    let block = extract_json_block(raw);
    if let Ok(parsed) = serde_json::from_str::<FactEngineResult>(&block) {
        return Ok(parsed.cleaned());
    }
    if let Ok(arr) = serde_json::from_str::<Vec<String>>(&block) {
        return Ok(FactEngineResult { facts: arr, used_fact_ids: Vec::new() }.cleaned());
    }
    Err(Error::Llm(format!("fact engine invalid json: {}", block.chars().take(200).collect::<String>())))
}

/// Run the fact-extraction LLM over a session transcript.
pub async fn extract_facts_and_usage(
    cancel: &CancellationToken,
    client: &ChatClient,
    retry: &RetryOptions,
    session_text: &str,
    existing: &FactsFile,
) -> Result<FactEngineResult> {
    let user = format!(
        "Conversation:\n{session_text}\n\nExisting facts (ID: content):\n{}\n\n\
         Return ONLY a JSON object like:\n{{\"facts\": [\"...\"], \"used_fact_ids\": [\"F01\", \"F02\"]}}\n",
        format_facts_for_context(existing)
    );
    let messages = vec![ChatMessage::system(FACT_SYSTEM_PROMPT), ChatMessage::user(user)];

    mew_llm::retry::call_with_retry(cancel, retry, || async {
        let out = client.chat(&messages).await?;
        parse_fact_engine_output(&out)
    })
    .await
}

/// Summarize one session record into a few sentences.
pub async fn summarize_record(
    cancel: &CancellationToken,
    client: &ChatClient,
    retry: &RetryOptions,
    record_text: &str,
) -> Result<String> {
    let messages = vec![
        ChatMessage::system(SUMMARY_SYSTEM_PROMPT),
        ChatMessage::user(format!("Session Record:\n{record_text}")),
    ];

    mew_llm::retry::call_with_retry(cancel, retry, || async {
        let out = client.chat(&messages).await?;
        let trimmed = out.trim().to_owned();
        if trimmed.is_empty() {
            return Err(Error::Llm("empty summary".into()));
        }
        Ok(trimmed)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_output_parses() {
        let out = parse_fact_engine_output(
            r#"{"facts": [" likes tea ", ""], "used_fact_ids": ["F01", " "]}"#,
        )
        .unwrap();
        assert_eq!(out.facts, vec!["likes tea"]);
        assert_eq!(out.used_fact_ids, vec!["F01"]);
    }

    #[test]
    fn bare_array_is_accepted() {
        let out = parse_fact_engine_output(r#"["plays go", "owns a cat"]"#).unwrap();
        assert_eq!(out.facts.len(), 2);
        assert!(out.used_fact_ids.is_empty());
    }

    #[test]
    fn fenced_output_parses() {
        let out = parse_fact_engine_output("```json\n{\"facts\":[\"a\"]}\n```").unwrap();
        assert_eq!(out.facts, vec!["a"]);
    }

    #[test]
    fn garbage_is_a_transient_error() {
        let err = parse_fact_engine_output("I could not comply").unwrap_err();
        assert!(err.is_transient());
    }
}
