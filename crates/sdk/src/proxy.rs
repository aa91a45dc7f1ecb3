//! Proxy pool for outbound dials that must not originate from the host IP.
//!
//! A manager periodically downloads a proxy list, health-checks every entry
//! in parallel (a capped HTTPS request through the proxy must succeed under
//! the threshold), and round-robins live entries. The live list is cached on
//! disk with a TTL so restarts do not re-check the world. Constructed
//! explicitly at startup and passed down; no global singleton.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use mew_domain::error::{Error, Result};

use crate::store::{load_json, save_json};

const HEALTH_CHECK_URL: &str = "https://www.cloudflare.com";

#[derive(Debug, Clone)]
pub struct ProxyPoolOptions {
    /// URL serving a newline-separated proxy list (`socks5://host:port` or
    /// bare `host:port`).
    pub list_url: String,
    pub refresh_interval: Duration,
    pub check_timeout: Duration,
    /// Disk cache for the live list.
    pub cache_path: PathBuf,
    pub cache_ttl: Duration,
    pub max_parallel_checks: usize,
}

impl Default for ProxyPoolOptions {
    fn default() -> Self {
        Self {
            list_url: String::new(),
            refresh_interval: Duration::from_secs(30 * 60),
            check_timeout: Duration::from_secs(8),
            cache_path: PathBuf::from("data/proxy-pool.json"),
            cache_ttl: Duration::from_secs(60 * 60),
            max_parallel_checks: 16,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CachedPool {
    #[serde(default)]
    fetched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    proxies: Vec<String>,
}

/// Round-robin pool of verified proxies.
pub struct ProxyPool {
    opts: ProxyPoolOptions,
    http: reqwest::Client,
    live: RwLock<Vec<String>>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new(opts: ProxyPoolOptions, http: reqwest::Client) -> Arc<Self> {
        Arc::new(Self { opts, http, live: RwLock::new(Vec::new()), cursor: AtomicUsize::new(0) })
    }

    /// The next live proxy URL, round-robin. `None` when the pool is empty
    /// (callers dial direct).
    pub fn next(&self) -> Option<String> {
        let live = self.live.read();
        if live.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % live.len();
        Some(live[idx].clone())
    }

    pub fn live_count(&self) -> usize {
        self.live.read().len()
    }

    /// Load the disk cache when still within TTL. Returns whether anything
    /// usable was restored.
    pub fn restore_from_cache(&self) -> bool {
        let cached: CachedPool = match load_json(&self.opts.cache_path) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let Some(fetched_at) = cached.fetched_at else {
            return false;
        };
        let age = Utc::now().signed_duration_since(fetched_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 > self.opts.cache_ttl.as_secs() {
            return false;
        }
        if cached.proxies.is_empty() {
            return false;
        }
        *self.live.write() = cached.proxies;
        true
    }

    /// Download the list, health-check in parallel, replace the live set.
    pub async fn refresh(&self, cancel: &CancellationToken) -> Result<usize> {
        if self.opts.list_url.trim().is_empty() {
            return Err(Error::Config("proxy list url not configured".into()));
        }

        let body = self
            .http
            .get(self.opts.list_url.trim())
            .send()
            .await
            .map_err(|e| Error::Http(format!("proxy list fetch: {e}")))?
            .text()
            .await
            .map_err(|e| Error::Http(format!("proxy list read: {e}")))?;

        let candidates = parse_proxy_list(&body);
        if candidates.is_empty() {
            return Ok(0);
        }

        let sem = Arc::new(tokio::sync::Semaphore::new(self.opts.max_parallel_checks.max(1)));
        let mut checks = tokio::task::JoinSet::new();
        for candidate in candidates {
            let sem = sem.clone();
            let timeout = self.opts.check_timeout;
            let cancel = cancel.clone();
            checks.spawn(async move {
                let _permit = sem.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }
                check_proxy(&candidate, timeout).await.then_some(candidate)
            });
        }

        let mut live = Vec::new();
        while let Some(res) = checks.join_next().await {
            if let Ok(Some(proxy)) = res {
                live.push(proxy);
            }
        }
        live.sort();

        let count = live.len();
        *self.live.write() = live.clone();
        self.cursor.store(0, Ordering::Relaxed);

        let cache = CachedPool { fetched_at: Some(Utc::now()), proxies: live };
        if let Err(e) = save_json(&self.opts.cache_path, &cache) {
            tracing::warn!(error = %e, "proxy pool cache write failed");
        }

        tracing::info!(live = count, "proxy pool refreshed");
        Ok(count)
    }

    /// Background refresh loop. Restores from the disk cache first, then
    /// refreshes on the configured interval.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if self.restore_from_cache() {
            tracing::info!(live = self.live_count(), "proxy pool restored from cache");
        } else if let Err(e) = self.refresh(&cancel).await {
            tracing::warn!(error = %e, "initial proxy refresh failed");
        }

        let mut ticker = tokio::time::interval(self.opts.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh(&cancel).await {
                        tracing::warn!(error = %e, "proxy refresh failed");
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
}

/// Parse a newline-separated proxy list; bare `host:port` becomes socks5.
pub fn parse_proxy_list(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let url = if line.contains("://") { line.to_owned() } else { format!("socks5://{line}") };
        if url::Url::parse(&url).map(|u| u.host_str().is_some()).unwrap_or(false) && !out.contains(&url) {
            out.push(url);
        }
    }
    out
}

/// A proxy is live when a TLS request through it completes under the
/// threshold with certificate verification intact.
async fn check_proxy(proxy_url: &str, timeout: Duration) -> bool {
    let Ok(proxy) = reqwest::Proxy::all(proxy_url) else {
        return false;
    };
    let Ok(client) = reqwest::Client::builder().proxy(proxy).timeout(timeout).build() else {
        return false;
    };
    match client.head(HEALTH_CHECK_URL).send().await {
        Ok(resp) => resp.status().as_u16() < 500,
        Err(_) => false,
    }
}
