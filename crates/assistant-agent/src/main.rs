//! Assistant bot host.
//!
//! No flags; behavior is entirely env-driven. Exit 0 on clean shutdown,
//! non-zero on fatal configuration failure.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use mew_assistant::AssistantRunnerFactory;
use mew_client::http::{build_client, ClientOptions, ProxyMode, DEFAULT_LLM_TIMEOUT};
use mew_domain::config::RuntimeConfig;
use mew_sdk::service::{load_dotenv, run_service_with_signals, ServiceOptions};

const SERVICE_TYPE: &str = "assistant-agent";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cfg = RuntimeConfig::from_env(SERVICE_TYPE).context("loading runtime config")?;

    let proxy = ProxyMode::from_env().context("parsing MEW_API_PROXY")?;
    let server_http = build_client(&ClientOptions { proxy: proxy.clone(), ..Default::default() })
        .context("building server http client")?;
    let llm_http = build_client(&ClientOptions {
        timeout: DEFAULT_LLM_TIMEOUT,
        proxy,
        user_agent: None,
    })
    .context("building llm http client")?;

    let factory = Arc::new(AssistantRunnerFactory::new(cfg.clone(), server_http, llm_http));

    let opts = ServiceOptions {
        server_name: "Assistant".into(),
        description: "Conversational assistant with layered memory".into(),
        config_template: mew_assistant::config_template(),
        ..Default::default()
    };

    run_service_with_signals(cfg, opts, factory).await.context("service failed")?;
    Ok(())
}
