//! Size-capped attachment downloads.
//!
//! An attachment is fetched either through the channel's authenticated
//! upload endpoint (storage key) or from its direct URL. Downloads stop as
//! soon as the byte cap is exceeded so a hostile attachment cannot balloon
//! memory.

use futures_util::StreamExt;

use mew_domain::error::{Error, Result};
use mew_domain::types::AttachmentRef;

use crate::http::from_reqwest;
use crate::session::BotSession;

/// Download the bytes behind an attachment reference, up to `limit` bytes.
pub async fn download_attachment(
    session: &BotSession,
    channel_id: &str,
    att: &AttachmentRef,
    limit: usize,
) -> Result<Vec<u8>> {
    if !att.key.trim().is_empty() {
        let req = session
            .get(&format!("/channels/{channel_id}/uploads/{}", att.key.trim()))
            .await?;
        return read_capped(req, limit).await;
    }
    if !att.url.trim().is_empty() {
        let url = att.url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::Config(format!("unsupported attachment url: {url:?}")));
        }
        let req = session.http().get(url);
        return read_capped(req, limit).await;
    }
    Err(Error::NotFound("attachment has neither key nor url".into()))
}

async fn read_capped(req: reqwest::RequestBuilder, limit: usize) -> Result<Vec<u8>> {
    let resp = req.send().await.map_err(from_reqwest)?;
    if !resp.status().is_success() {
        return Err(Error::Api {
            status: resp.status().as_u16(),
            body: "attachment download failed".into(),
        });
    }

    if let Some(len) = resp.content_length() {
        if len as usize > limit {
            return Err(Error::Other(format!("attachment exceeds cap: {len} > {limit} bytes")));
        }
    }

    let mut buf = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(from_reqwest)?;
        if buf.len() + chunk.len() > limit {
            return Err(Error::Other(format!("attachment exceeds cap: >{limit} bytes")));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}
