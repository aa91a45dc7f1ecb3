//! Card construction and webhook delivery for feed items.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use mew_client::devmode::DevMode;
use mew_client::webhook::{self, MediaCache, Payload, UploadedAttachment};
use mew_domain::error::{Error, Result};
use mew_sdk::fetch::{FetchItem, Publisher};
use mew_sdk::proxy::ProxyPool;

const SERVICE_TYPE: &str = "feed-fetcher";
const MEDIA_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const MAX_MEDIA_BYTES: usize = 25 * 1024 * 1024;

pub struct FeedPublisher {
    pub http: reqwest::Client,
    pub api_base: String,
    pub webhook_url: String,
    pub media_cache: MediaCache,
    pub dev: DevMode,
    pub username: String,
    pub avatar_url: String,
    /// When configured, a failed direct media download retries once through
    /// the next live proxy.
    pub proxy_pool: Option<Arc<ProxyPool>>,
}

impl FeedPublisher {
    /// Render the card content line: `**title**` plus a body excerpt and
    /// the link.
    fn build_payload(&self, item: &FetchItem, image_key: Option<String>) -> Payload {
        let title = item.data["title"].as_str().unwrap_or("").trim();
        let url = item.data["url"].as_str().unwrap_or("").trim();
        let text = item.data["text"].as_str().unwrap_or("").trim();
        let feed_title = item.data["feed_title"].as_str().unwrap_or("").trim();

        let mut content = String::new();
        if !title.is_empty() {
            content.push_str(&format!("**{title}**\n"));
        }
        if !text.is_empty() {
            let excerpt: String = text.chars().take(500).collect();
            content.push_str(&excerpt);
            content.push('\n');
        }
        if !url.is_empty() {
            content.push_str(url);
        }

        let mut payload = Payload::card(
            content.trim(),
            "card/feed",
            serde_json::json!({
                "feedTitle": feed_title,
                "title": title,
                "url": url,
                "imageKey": image_key,
            }),
        );
        if !self.username.is_empty() {
            payload.username = Some(self.username.clone());
        }
        if !self.avatar_url.is_empty() {
            payload.avatar_url = Some(self.avatar_url.clone());
        }
        payload
    }
}

impl FeedPublisher {
    /// Download-then-upload with a single proxied retry when a pool is
    /// configured.
    async fn upload_media(&self, image_url: &str) -> Result<UploadedAttachment> {
        let direct = webhook::upload_remote(
            &self.http,
            &self.http,
            &self.media_cache,
            &self.api_base,
            &self.webhook_url,
            image_url,
            "image.jpg",
            MEDIA_UA,
            MAX_MEDIA_BYTES,
            &self.dev,
            SERVICE_TYPE,
        )
        .await;

        let err = match direct {
            Ok(uploaded) => return Ok(uploaded),
            Err(e) => e,
        };

        let Some(proxy_url) = self.proxy_pool.as_ref().and_then(|p| p.next()) else {
            return Err(err);
        };
        tracing::info!(image_url, proxy = %proxy_url, "retrying media download via proxy");
        let proxied = reqwest::Client::builder()
            .proxy(
                reqwest::Proxy::all(&proxy_url)
                    .map_err(|e| Error::Config(format!("bad proxy {proxy_url:?}: {e}")))?,
            )
            .timeout(std::time::Duration::from_secs(45))
            .build()
            .map_err(|e| Error::Http(format!("building proxied client: {e}")))?;

        webhook::upload_remote(
            &proxied,
            &self.http,
            &self.media_cache,
            &self.api_base,
            &self.webhook_url,
            image_url,
            "image.jpg",
            MEDIA_UA,
            MAX_MEDIA_BYTES,
            &self.dev,
            SERVICE_TYPE,
        )
        .await
    }
}

#[async_trait::async_trait]
impl Publisher for FeedPublisher {
    async fn publish(&self, _cancel: &CancellationToken, item: &FetchItem) -> Result<()> {
        // Upload the item's image through the cache first; a failure only
        // costs the thumbnail, not the card.
        let mut image_key = None;
        if let Some(image_url) = item.data["image"].as_str().filter(|u| !u.trim().is_empty()) {
            match self.upload_media(image_url).await {
                Ok(uploaded) => image_key = Some(uploaded.key),
                Err(e) => {
                    tracing::warn!(item_id = %item.id, image_url, error = %e, "media upload failed");
                }
            }
        }

        let payload = self.build_payload(item, image_key);
        webhook::post(
            &self.http,
            &self.api_base,
            &self.webhook_url,
            &payload,
            webhook::DEFAULT_POST_ATTEMPTS,
            &self.dev,
            SERVICE_TYPE,
        )
        .await
    }
}
