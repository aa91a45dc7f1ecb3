//! Feed fetcher host.
//!
//! No flags; behavior is entirely env-driven. Exit 0 on clean shutdown,
//! non-zero on fatal configuration failure.

mod config;
mod publish;
mod runner;
mod source;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mew_client::http::{build_client, ClientOptions, ProxyMode};
use mew_domain::config::RuntimeConfig;
use mew_sdk::proxy::{ProxyPool, ProxyPoolOptions};
use mew_sdk::service::{load_dotenv, run_service_with_signals, ServiceOptions};

use crate::runner::FeedRunnerFactory;

const SERVICE_TYPE: &str = "feed-fetcher";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cfg = RuntimeConfig::from_env(SERVICE_TYPE).context("loading runtime config")?;

    let http = build_client(&ClientOptions {
        timeout: Duration::from_secs(45),
        proxy: ProxyMode::from_env().context("parsing MEW_API_PROXY")?,
        user_agent: None,
    })
    .context("building http client")?;

    // Optional proxy pool for media downloads; lives for the whole process.
    let proxy_pool = std::env::var("MEW_PROXY_LIST_URL")
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .map(|list_url| {
            let pool = ProxyPool::new(
                ProxyPoolOptions {
                    list_url,
                    cache_path: std::path::PathBuf::from(&cfg.state_dir).join("proxy-pool.json"),
                    ..Default::default()
                },
                http.clone(),
            );
            tokio::spawn(pool.clone().run(tokio_util::sync::CancellationToken::new()));
            pool
        });

    let factory = Arc::new(FeedRunnerFactory::new(cfg.clone(), http, proxy_pool));

    let opts = ServiceOptions {
        server_name: "Feeds".into(),
        description: "Posts new feed entries to channel webhooks".into(),
        config_template: config::config_template(),
        ..Default::default()
    };

    run_service_with_signals(cfg, opts, factory).await.context("service failed")?;
    Ok(())
}
