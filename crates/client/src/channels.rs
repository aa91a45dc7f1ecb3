//! Channel message APIs and the DM-channel cache.

use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use mew_domain::error::{Error, Result};
use mew_domain::types::{Channel, ChannelMessage};

use crate::http::{api_error, from_reqwest};
use crate::session::BotSession;

pub const MAX_PAGE_SIZE: usize = 100;

/// Paginated history fetch, descending by id. `before` is exclusive.
pub async fn fetch_channel_messages(
    session: &BotSession,
    channel_id: &str,
    limit: usize,
    before: &str,
) -> Result<Vec<ChannelMessage>> {
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    let mut req = session
        .get(&format!("/channels/{channel_id}/messages"))
        .await?
        .query(&[("limit", limit.to_string())]);
    if !before.trim().is_empty() {
        req = req.query(&[("before", before)]);
    }

    let resp = req.send().await.map_err(from_reqwest)?;
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    let msgs: Vec<ChannelMessage> = resp.json().await.map_err(from_reqwest)?;
    Ok(msgs)
}

/// Server-side substring search over a channel's history.
pub async fn search_channel_messages(
    session: &BotSession,
    channel_id: &str,
    query: &str,
    limit: usize,
    page: usize,
) -> Result<Vec<ChannelMessage>> {
    let resp = session
        .get(&format!("/channels/{channel_id}/messages/search"))
        .await?
        .query(&[
            ("query", query.to_owned()),
            ("limit", limit.max(1).to_string()),
            ("page", page.max(1).to_string()),
        ])
        .send()
        .await
        .map_err(from_reqwest)?;
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    let msgs: Vec<ChannelMessage> = resp.json().await.map_err(from_reqwest)?;
    Ok(msgs)
}

/// HTTP message send, used for proactive messages and as the gateway
/// fallback path.
pub async fn post_message(session: &BotSession, channel_id: &str, content: &str) -> Result<()> {
    let channel_id = channel_id.trim();
    if channel_id.is_empty() {
        return Err(Error::Config("channel id is required".into()));
    }
    let resp = session
        .post(&format!("/channels/{channel_id}/messages"))
        .await?
        .json(&json!({ "content": content }))
        .send()
        .await
        .map_err(from_reqwest)?;
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    Ok(())
}

/// List the channels visible to the bot user.
pub async fn list_my_channels(session: &BotSession) -> Result<Vec<Channel>> {
    let resp = session.get("/users/@me/channels").await?.send().await.map_err(from_reqwest)?;
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    let channels: Vec<Channel> = resp.json().await.map_err(from_reqwest)?;
    Ok(channels)
}

/// Drop retracted messages, preserving order.
pub fn filter_retracted(msgs: Vec<ChannelMessage>) -> Vec<ChannelMessage> {
    msgs.into_iter().filter(|m| !m.is_retracted()).collect()
}

/// Cached set of known DM channel ids.
///
/// Callers never touch the underlying set; membership reads take a snapshot
/// lock internally, and refresh replaces the whole set from the server.
#[derive(Clone, Default)]
pub struct DmChannelCache {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl DmChannelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, channel_id: &str) -> bool {
        self.inner.read().contains(channel_id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Replace the cache from `GET /users/@me/channels`.
    pub async fn refresh(&self, session: &BotSession) -> Result<usize> {
        let channels = list_my_channels(session).await?;
        let dms: HashSet<String> =
            channels.into_iter().filter(|c| c.is_dm()).map(|c| c.id).collect();
        let count = dms.len();
        *self.inner.write() = dms;
        Ok(count)
    }

    /// Test/seed hook: insert a known DM channel id directly.
    pub fn insert(&self, channel_id: &str) {
        self.inner.write().insert(channel_id.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mew_domain::types::AuthorRef;

    #[test]
    fn dm_cache_membership() {
        let cache = DmChannelCache::new();
        assert!(!cache.has("C1"));
        cache.insert("C1");
        assert!(cache.has("C1"));
        assert!(!cache.has("G1"));
    }

    #[test]
    fn retracted_messages_are_dropped() {
        let mk = |id: &str, retracted: bool| ChannelMessage {
            id: id.into(),
            channel_id: "C1".into(),
            content: "hi".into(),
            attachments: vec![],
            created_at: Some(chrono::Utc::now()),
            author: Some(AuthorRef::Id("U1".into())),
            retracted_at: retracted.then(chrono::Utc::now),
            kind: String::new(),
        };
        let out = filter_retracted(vec![mk("M1", false), mk("M2", true), mk("M3", false)]);
        let ids: Vec<&str> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["M1", "M3"]);
    }
}
