//! Webhook uploads: multipart POST to `<webhook>/upload`, plus the
//! download-then-upload path for remote media with cache consultation.

use futures_util::StreamExt;
use serde::Deserialize;

use mew_domain::error::{Error, Result};

use crate::devmode::{sanitize_filename, DevMode};
use crate::http::from_reqwest;
use crate::webhook::media_cache::MediaCache;
use crate::webhook::{build_upload_url, rewrite_loopback_url};

pub const DEFAULT_REMOTE_MEDIA_CAP: usize = 25 * 1024 * 1024;

/// The server's upload response.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedAttachment {
    #[serde(default)]
    pub filename: String,
    #[serde(rename = "contentType", default)]
    pub content_type: String,
    pub key: String,
    #[serde(default)]
    pub size: i64,
}

/// Upload raw bytes through the webhook's `/upload` endpoint.
pub async fn upload_bytes(
    http: &reqwest::Client,
    api_base: &str,
    webhook_url: &str,
    filename: &str,
    content_type: &str,
    data: Vec<u8>,
    dev: &DevMode,
    service_type: &str,
) -> Result<UploadedAttachment> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(Error::Config("filename is required".into()));
    }
    let content_type = if content_type.trim().is_empty() {
        "application/octet-stream"
    } else {
        content_type.trim()
    };

    if dev.enabled() {
        let size = data.len() as i64;
        let (_, key) = dev.record_upload(service_type, filename, &data)?;
        return Ok(UploadedAttachment {
            filename: filename.to_owned(),
            content_type: content_type.to_owned(),
            key,
            size,
        });
    }

    let target = build_upload_url(webhook_url)?;
    let target = rewrite_loopback_url(&target, api_base)?;

    let part = reqwest::multipart::Part::bytes(data)
        .file_name(sanitize_filename(filename))
        .mime_str(content_type)
        .map_err(|e| Error::Config(format!("invalid content type {content_type:?}: {e}")))?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let resp = http
        .post(&target)
        .header("Accept", "application/json")
        .multipart(form)
        .send()
        .await
        .map_err(from_reqwest)?;

    let status = resp.status();
    let body = resp.bytes().await.map_err(from_reqwest)?;
    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).trim().chars().take(512).collect(),
        });
    }

    let parsed: UploadedAttachment = serde_json::from_slice(&body)?;
    if parsed.key.trim().is_empty() {
        return Err(Error::Other("upload response missing key".into()));
    }
    Ok(parsed)
}

/// Download a remote file (size-capped) and upload it to the webhook.
///
/// The media cache is consulted first; a hit short-circuits to the stored
/// storage key without any network traffic.
#[allow(clippy::too_many_arguments)]
pub async fn upload_remote(
    download_client: &reqwest::Client,
    upload_client: &reqwest::Client,
    cache: &MediaCache,
    api_base: &str,
    webhook_url: &str,
    remote_url: &str,
    fallback_filename: &str,
    user_agent: &str,
    max_bytes: usize,
    dev: &DevMode,
    service_type: &str,
) -> Result<UploadedAttachment> {
    let src = remote_url.trim();
    if src.is_empty() {
        return Err(Error::Config("remote url is required".into()));
    }
    if !src.starts_with("http://") && !src.starts_with("https://") {
        return Err(Error::Config(format!("unsupported url: {src:?}")));
    }

    if let Some(key) = cache.get(src) {
        return Ok(UploadedAttachment {
            filename: filename_from_url(src, fallback_filename),
            content_type: String::new(),
            key,
            size: 0,
        });
    }

    let mut req = download_client.get(src).header("Accept", "*/*");
    if !user_agent.trim().is_empty() {
        req = req.header("User-Agent", user_agent.trim());
    }
    let resp = req.send().await.map_err(from_reqwest)?;
    if !resp.status().is_success() {
        return Err(Error::Api { status: resp.status().as_u16(), body: format!("download failed: {src}") });
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_owned();

    if let Some(len) = resp.content_length() {
        if len as usize > max_bytes {
            return Err(Error::Other(format!("remote media exceeds cap: {len} > {max_bytes}")));
        }
    }
    let mut data = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(from_reqwest)?;
        if data.len() + chunk.len() > max_bytes {
            return Err(Error::Other(format!("remote media exceeds cap: >{max_bytes} bytes")));
        }
        data.extend_from_slice(&chunk);
    }

    let filename = filename_from_url(src, fallback_filename);
    let uploaded = upload_bytes(
        upload_client,
        api_base,
        webhook_url,
        &filename,
        &content_type,
        data,
        dev,
        service_type,
    )
    .await?;

    cache.put(src, &uploaded.key);
    Ok(uploaded)
}

/// Derive a usable filename from a URL path, falling back when the path has
/// no useful leaf (or a server-script extension like `.php`).
pub fn filename_from_url(raw_url: &str, fallback: &str) -> String {
    let fallback = if fallback.trim().is_empty() { "file" } else { fallback.trim() };
    let parsed = match url::Url::parse(raw_url) {
        Ok(u) => u,
        Err(_) => return fallback.to_owned(),
    };
    let leaf = parsed
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or("")
        .trim()
        .to_owned();
    if leaf.is_empty() {
        return fallback.to_owned();
    }
    let ext = leaf.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    if matches!(ext.as_str(), "php" | "asp" | "aspx" | "cgi" | "jsp") {
        return fallback.to_owned();
    }
    sanitize_filename(&leaf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_from_url_prefers_path_leaf() {
        assert_eq!(filename_from_url("https://x.example/a/b/cat.png", "fb"), "cat.png");
        assert_eq!(filename_from_url("https://x.example/", "fb.jpg"), "fb.jpg");
        assert_eq!(filename_from_url("https://x.example/img.php", "fb.jpg"), "fb.jpg");
        assert_eq!(filename_from_url("not a url", "fb"), "fb");
    }
}
