//! Process-wide runtime configuration.
//!
//! Every plugin executable is entirely env-driven (no CLI flags). The
//! configuration is loaded once at startup and passed down explicitly, never
//! read from globals afterwards.

use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_API_BASE: &str = "http://localhost:3000/api";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Process-wide runtime configuration, resolved from the environment once at
/// startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Admin secret sent as `X-Mew-Admin-Secret` to privileged endpoints.
    pub admin_secret: String,
    /// Tag identifying this plugin's category (e.g. `assistant-agent`).
    pub service_type: String,
    /// Server API base URL, e.g. `http://localhost:3000/api`.
    pub api_base: String,
    /// Server origin, used to derive the WebSocket URL.
    pub mew_url: String,
    /// How often the supervisor reconciles against the bootstrap list.
    pub sync_interval: Duration,
    /// Root directory for per-bot state files.
    pub state_dir: String,
}

impl RuntimeConfig {
    /// Load configuration from the process environment.
    ///
    /// `MEW_ADMIN_SECRET` is required; everything else has a default.
    pub fn from_env(service_type: &str) -> Result<Self> {
        let admin_secret = std::env::var("MEW_ADMIN_SECRET")
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Config("MEW_ADMIN_SECRET is required".into()))?;

        let mew_url = env_trimmed("MEW_URL");
        let api_base = resolve_api_base(env_trimmed("MEW_API_BASE").as_deref(), mew_url.as_deref());
        let mew_url = mew_url.unwrap_or_else(|| origin_of(&api_base));

        let sync_interval = env_trimmed("MEW_CONFIG_SYNC_INTERVAL_SECONDS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SYNC_INTERVAL);

        let state_dir = env_trimmed("MEW_STATE_DIR").unwrap_or_else(|| "data".into());

        if service_type.trim().is_empty() {
            return Err(Error::Config("service type must not be empty".into()));
        }

        Ok(Self {
            admin_secret,
            service_type: service_type.trim().to_owned(),
            api_base,
            mew_url,
            sync_interval,
            state_dir,
        })
    }
}

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty())
}

/// Resolve the API base: explicit `MEW_API_BASE` wins, then `<MEW_URL>/api`,
/// then the localhost default.
pub fn resolve_api_base(api_base: Option<&str>, mew_url: Option<&str>) -> String {
    if let Some(base) = api_base {
        return base.trim_end_matches('/').to_owned();
    }
    if let Some(origin) = mew_url {
        return format!("{}/api", origin.trim_end_matches('/'));
    }
    DEFAULT_API_BASE.to_owned()
}

/// Extract `scheme://host[:port]` from a URL, falling back to the input when
/// it does not parse.
pub fn origin_of(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(u) => {
            let mut origin = format!("{}://{}", u.scheme(), u.host_str().unwrap_or_default());
            if let Some(port) = u.port() {
                origin.push_str(&format!(":{port}"));
            }
            origin
        }
        Err(_) => raw.trim_end_matches('/').to_owned(),
    }
}

/// Derive the Socket.IO WebSocket URL from the server origin.
pub fn websocket_url(mew_url: &str) -> Result<String> {
    let u = url::Url::parse(mew_url.trim())
        .map_err(|e| Error::Config(format!("invalid MEW_URL {mew_url:?}: {e}")))?;
    let scheme = match u.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => u.scheme(),
        other => return Err(Error::Config(format!("unsupported scheme {other:?}"))),
    };
    let host = u
        .host_str()
        .ok_or_else(|| Error::Config(format!("missing host in {mew_url:?}")))?;
    let mut out = format!("{scheme}://{host}");
    if let Some(port) = u.port() {
        out.push_str(&format!(":{port}"));
    }
    out.push_str("/socket.io/?EIO=4&transport=websocket");
    Ok(out)
}
