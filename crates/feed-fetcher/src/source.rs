//! JSON Feed source with conditional fetching.
//!
//! Speaks the JSON Feed format (jsonfeed.org): `{"title", "items": [{"id",
//! "url", "title", "content_text", "date_published", "image"}]}`. Sends
//! `If-None-Match` / `If-Modified-Since` from the stored validators; a
//! `304 Not Modified` short-circuits the whole cycle.

use chrono::DateTime;
use serde::Deserialize;

use mew_domain::error::{Error, Result};
use mew_sdk::fetch::{Conditional, FetchItem, FetchOutcome, Source};

#[derive(Debug, Deserialize)]
struct JsonFeed {
    #[serde(default)]
    title: String,
    #[serde(default)]
    items: Vec<JsonFeedItem>,
}

#[derive(Debug, Deserialize)]
struct JsonFeedItem {
    #[serde(default)]
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content_text: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    date_published: String,
    #[serde(default)]
    image: String,
}

pub struct JsonFeedSource {
    http: reqwest::Client,
    feed_url: String,
}

impl JsonFeedSource {
    pub fn new(http: reqwest::Client, feed_url: &str) -> Self {
        Self { http, feed_url: feed_url.trim().to_owned() }
    }
}

#[async_trait::async_trait]
impl Source for JsonFeedSource {
    async fn fetch(&self, conditional: &Conditional) -> Result<FetchOutcome> {
        let mut req = self.http.get(&self.feed_url).header("Accept", "application/feed+json, application/json");
        if !conditional.etag.is_empty() {
            req = req.header("If-None-Match", &conditional.etag);
        }
        if !conditional.last_modified.is_empty() {
            req = req.header("If-Modified-Since", &conditional.last_modified);
        }

        let resp = req.send().await.map_err(|e| Error::Http(format!("feed fetch: {e}")))?;
        if resp.status().as_u16() == 304 {
            return Ok(FetchOutcome { not_modified: true, ..Default::default() });
        }
        if !resp.status().is_success() {
            return Err(Error::Api {
                status: resp.status().as_u16(),
                body: format!("feed fetch failed: {}", self.feed_url),
            });
        }

        let etag = header_string(&resp, reqwest::header::ETAG);
        let last_modified = header_string(&resp, reqwest::header::LAST_MODIFIED);

        let body = resp.bytes().await.map_err(|e| Error::Http(format!("feed read: {e}")))?;
        let feed: JsonFeed = serde_json::from_slice(&body)
            .map_err(|e| Error::Http(format!("feed parse ({}): {e}", self.feed_url)))?;

        Ok(FetchOutcome {
            not_modified: false,
            etag,
            last_modified,
            items: feed.items.iter().map(|item| to_fetch_item(&feed.title, item)).collect(),
        })
    }
}

fn header_string(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> String {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim()
        .to_owned()
}

fn to_fetch_item(feed_title: &str, item: &JsonFeedItem) -> FetchItem {
    // JSON Feed requires an id, but real feeds drift; fall back to the URL.
    let id = if item.id.trim().is_empty() { item.url.trim() } else { item.id.trim() };
    let text = if item.content_text.trim().is_empty() {
        item.summary.trim()
    } else {
        item.content_text.trim()
    };
    FetchItem {
        id: id.to_owned(),
        timestamp: DateTime::parse_from_rfc3339(item.date_published.trim())
            .map(|t| t.to_utc())
            .ok(),
        data: serde_json::json!({
            "feed_title": feed_title.trim(),
            "title": item.title.trim(),
            "url": item.url.trim(),
            "text": text,
            "image": item.image.trim(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_mapping_falls_back_to_url_id() {
        let feed: JsonFeed = serde_json::from_str(
            r#"{
                "title": "Example Feed",
                "items": [
                    {"id": "one", "title": "First", "content_text": "hello",
                     "date_published": "2026-08-01T12:00:00Z", "image": "https://x/img.png"},
                    {"url": "https://x/post/2", "summary": "fallback text"}
                ]
            }"#,
        )
        .unwrap();

        let first = to_fetch_item(&feed.title, &feed.items[0]);
        assert_eq!(first.id, "one");
        assert_eq!(first.timestamp.unwrap().timestamp(), 1_785_585_600);
        assert_eq!(first.data["feed_title"], "Example Feed");
        assert_eq!(first.data["image"], "https://x/img.png");

        let second = to_fetch_item(&feed.title, &feed.items[1]);
        assert_eq!(second.id, "https://x/post/2");
        assert!(second.timestamp.is_none());
        assert_eq!(second.data["text"], "fallback text");
    }
}
