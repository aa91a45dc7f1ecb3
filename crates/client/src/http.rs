//! Shared reqwest client construction.
//!
//! Proxy behavior for server-facing clients follows `MEW_API_PROXY`:
//! - unset/`0`/`false`/`off`/`no`/`none`/`direct`: no proxy, even when
//!   `HTTP_PROXY`/`HTTPS_PROXY` are set
//! - `env`: honor the standard proxy environment variables
//! - anything else: a fixed proxy URL (scheme defaults to `http://`)

use std::time::Duration;

use mew_domain::error::{Error, Result};

pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(75);

/// How outbound requests should be proxied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProxyMode {
    /// Never proxy, ignoring proxy env vars.
    #[default]
    Direct,
    /// Honor `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`.
    Env,
    /// A fixed proxy URL.
    Fixed(String),
}

impl ProxyMode {
    /// Parse the `MEW_API_PROXY` convention.
    pub fn parse(raw: &str) -> Result<ProxyMode> {
        let v = raw.trim();
        if v.is_empty() {
            return Ok(ProxyMode::Direct);
        }
        match v.to_ascii_lowercase().as_str() {
            "0" | "false" | "off" | "no" | "none" | "direct" => Ok(ProxyMode::Direct),
            "env" => Ok(ProxyMode::Env),
            _ => {
                let url = if v.contains("://") { v.to_owned() } else { format!("http://{v}") };
                let parsed = url::Url::parse(&url)
                    .map_err(|e| Error::Config(format!("invalid MEW_API_PROXY {raw:?}: {e}")))?;
                match parsed.scheme() {
                    "http" | "https" | "socks5" | "socks5h" => {}
                    other => {
                        return Err(Error::Config(format!(
                            "unsupported MEW_API_PROXY scheme {other:?}"
                        )))
                    }
                }
                if parsed.host_str().is_none() {
                    return Err(Error::Config(format!("MEW_API_PROXY {raw:?} missing host")));
                }
                Ok(ProxyMode::Fixed(url))
            }
        }
    }

    /// Parse from the environment variable itself.
    pub fn from_env() -> Result<ProxyMode> {
        match std::env::var("MEW_API_PROXY") {
            Ok(v) => ProxyMode::parse(&v),
            Err(_) => Ok(ProxyMode::Direct),
        }
    }
}

/// Options for building a shared HTTP client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub proxy: ProxyMode,
    pub user_agent: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SERVER_TIMEOUT,
            proxy: ProxyMode::Direct,
            user_agent: None,
        }
    }
}

/// Build a reqwest client from the options.
pub fn build_client(opts: &ClientOptions) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(opts.timeout);

    match &opts.proxy {
        ProxyMode::Direct => builder = builder.no_proxy(),
        ProxyMode::Env => {}
        ProxyMode::Fixed(url) => {
            let proxy = reqwest::Proxy::all(url.as_str())
                .map_err(|e| Error::Config(format!("invalid proxy {url:?}: {e}")))?;
            builder = builder.proxy(proxy);
        }
    }

    if let Some(ua) = &opts.user_agent {
        builder = builder.user_agent(ua.clone());
    }

    builder
        .build()
        .map_err(|e| Error::Http(format!("building http client: {e}")))
}

pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Http(format!("timeout: {e}"))
    } else {
        Error::Http(e.to_string())
    }
}

/// Read a non-2xx response into an API error.
pub(crate) async fn api_error(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Error::Api { status, body: body.trim().chars().take(512).collect() }
}
