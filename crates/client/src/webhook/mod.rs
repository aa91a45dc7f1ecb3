//! Webhook surface: card posting with retry, the loopback URL rewrite, the
//! upload endpoint, and the bounded media cache.

pub mod media_cache;
pub mod upload;

pub use media_cache::MediaCache;
pub use upload::{upload_bytes, upload_remote, UploadedAttachment};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use mew_domain::error::{Error, Result};

use crate::devmode::DevMode;
use crate::http::from_reqwest;

pub const DEFAULT_POST_ATTEMPTS: u32 = 3;

/// A webhook card payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payload {
    pub content: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "avatar_url", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Payload {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), ..Default::default() }
    }

    pub fn card(content: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            content: content.into(),
            kind: Some(kind.into()),
            payload: Some(payload),
            ..Default::default()
        }
    }
}

/// Rewrite a loopback webhook URL's scheme and host to the API base origin.
///
/// Webhook URLs handed out by the server often point at `localhost`, which
/// resolves to the wrong place from inside a container. Idempotent.
pub fn rewrite_loopback_url(raw_url: &str, api_base: &str) -> Result<String> {
    let raw = raw_url.trim();
    if raw.is_empty() {
        return Err(Error::Config("empty webhook url".into()));
    }
    let mut u = url::Url::parse(raw).map_err(|e| Error::Config(format!("invalid webhook url {raw:?}: {e}")))?;

    let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
    let loopback = matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1" | "[::1]");
    if !loopback || api_base.trim().is_empty() {
        return Ok(raw.to_owned());
    }

    let base = url::Url::parse(api_base.trim())
        .map_err(|e| Error::Config(format!("invalid api base {api_base:?}: {e}")))?;
    u.set_scheme(base.scheme())
        .map_err(|_| Error::Config("cannot rewrite webhook scheme".into()))?;
    u.set_host(base.host_str())
        .map_err(|e| Error::Config(format!("cannot rewrite webhook host: {e}")))?;
    u.set_port(base.port()).map_err(|_| Error::Config("cannot rewrite webhook port".into()))?;
    Ok(u.to_string())
}

/// Append `/upload` to a webhook URL without duplicating it.
pub fn build_upload_url(webhook_url: &str) -> Result<String> {
    let raw = webhook_url.trim();
    if raw.is_empty() {
        return Err(Error::Config("empty webhook url".into()));
    }
    let mut u = url::Url::parse(raw)
        .map_err(|e| Error::Config(format!("invalid webhook url {raw:?}: {e}")))?;
    if u.host_str().is_none() {
        return Err(Error::Config(format!("invalid webhook url (missing host): {raw:?}")));
    }
    let path = u.path().trim_end_matches('/').to_owned();
    let path = if path.ends_with("/upload") { path } else { format!("{path}/upload") };
    u.set_path(&path);
    Ok(u.to_string())
}

/// POST a card payload with exponential-backoff retry (1 s, 2 s, 4 s ...).
///
/// In dev mode the payload is recorded to disk and no network call is made.
pub async fn post(
    http: &reqwest::Client,
    api_base: &str,
    webhook_url: &str,
    payload: &Payload,
    attempts: u32,
    dev: &DevMode,
    service_type: &str,
) -> Result<()> {
    let body = serde_json::to_vec(payload)?;

    if dev.enabled() {
        let path = dev.record_webhook(service_type, &body)?;
        tracing::info!(path = %path.display(), "dev mode: webhook recorded");
        return Ok(());
    }

    let target = rewrite_loopback_url(webhook_url, api_base)?;
    let attempts = attempts.max(1);
    let mut last_err = Error::Http("webhook post not attempted".into());

    for attempt in 0..attempts {
        if attempt > 0 {
            let backoff = Duration::from_secs(1 << (attempt - 1).min(4));
            tokio::time::sleep(backoff).await;
        }

        let result = http
            .post(&target)
            .header("Content-Type", "application/json")
            .body(body.clone())
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                let err = Error::Api { status, body: text.trim().chars().take(512).collect() };
                // 4xx (except 408/429) will not get better with retries.
                if !err.is_transient() {
                    return Err(err);
                }
                tracing::warn!(url = %target, status, attempt, "webhook post failed, will retry");
                last_err = err;
            }
            Err(e) => {
                tracing::warn!(url = %target, error = %e, attempt, "webhook post failed, will retry");
                last_err = from_reqwest(e);
            }
        }
    }
    Err(last_err)
}
