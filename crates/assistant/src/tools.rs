//! Tool implementations behind the reasoning loop.

use serde_json::json;

use mew_domain::error::Result;

use crate::constants::HISTORY_SEARCH_LIMIT;
use crate::prompt::format_session_record;
use crate::session::HistoryFetcher;

/// Executes tool calls for one channel. The trait exists so the loop can be
/// exercised without a server behind it.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn history_search(&self, keyword: &str) -> Result<serde_json::Value>;
    async fn record_search(&self, record_id: &str) -> Result<serde_json::Value>;
}

/// Server-backed tools scoped to one channel.
pub struct ChannelTools<'a> {
    pub fetcher: &'a HistoryFetcher,
    pub channel_id: String,
}

#[async_trait::async_trait]
impl ToolExecutor for ChannelTools<'_> {
    /// Substring search over channel history. Each hit is augmented with the
    /// record id of the session containing it; an unresolvable record id
    /// degrades to empty rather than failing the search.
    async fn history_search(&self, keyword: &str) -> Result<serde_json::Value> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(json!({ "messages": [] }));
        }

        let msgs = self
            .fetcher
            .search_history(&self.channel_id, keyword, HISTORY_SEARCH_LIMIT)
            .await?;

        let mut out = Vec::with_capacity(msgs.len());
        for msg in &msgs {
            let record_id = self
                .fetcher
                .record_id_for_message(&self.channel_id, &msg.id)
                .await
                .unwrap_or_default();
            out.push(json!({
                "id": msg.id,
                "createdAt": msg.created_at.map(|t| t.to_rfc3339()),
                "authorId": msg.author_id(),
                "author": msg.author_username(),
                "content": msg.content,
                "recordId": record_id,
            }));
        }
        Ok(json!({ "keyword": keyword, "messages": out }))
    }

    /// Load a full session record as the same transcript rendering L5 uses.
    async fn record_search(&self, record_id: &str) -> Result<serde_json::Value> {
        let msgs = self.fetcher.record_search(&self.channel_id, record_id).await?;
        Ok(json!({
            "recordId": record_id.trim(),
            "text": format_session_record(&msgs),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{msg, CannedHistory};

    #[tokio::test]
    async fn empty_keyword_returns_empty_list() {
        let fetcher = HistoryFetcher::new(Box::new(CannedHistory::new(vec![])));
        let tools = ChannelTools { fetcher: &fetcher, channel_id: "C1".into() };
        let out = tools.history_search("  ").await.unwrap();
        assert_eq!(out["messages"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn history_search_attaches_record_ids() {
        let fetcher = HistoryFetcher::new(Box::new(CannedHistory::new(vec![
            msg("M1", 0, "U1"),
            msg("M2", 50, "U1"),
        ])));
        let tools = ChannelTools { fetcher: &fetcher, channel_id: "C1".into() };
        let out = tools.history_search("msg M2").await.unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], "M2");
        assert_eq!(messages[0]["recordId"], "M1");
    }

    #[tokio::test]
    async fn record_search_returns_transcript() {
        let fetcher = HistoryFetcher::new(Box::new(CannedHistory::new(vec![
            msg("M1", 0, "U1"),
            msg("M2", 50, "U1"),
        ])));
        let tools = ChannelTools { fetcher: &fetcher, channel_id: "C1".into() };
        let out = tools.record_search("M1").await.unwrap();
        assert_eq!(out["recordId"], "M1");
        assert!(out["text"].as_str().unwrap().contains("[M1]"));

        assert!(tools.record_search("nope").await.is_err());
    }
}
