//! Service driver: the shared `main` of every plugin executable.
//!
//! Loads `.env`, resolves the runtime config, builds the admin client, runs
//! the initial bootstrap sync, then reconciles on every sync-interval tick
//! until the process is signalled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mew_client::admin::{AdminClient, ServiceTypeRegistration};
use mew_client::http::{build_client, ClientOptions, ProxyMode};
use mew_domain::config::RuntimeConfig;
use mew_domain::error::Result;

use crate::supervisor::{BotManager, RunnerFactory};

/// Options for one plugin service.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub server_name: String,
    pub icon: String,
    pub description: String,
    /// JSON template shown when creating a bot of this type.
    pub config_template: String,
    /// Skip the immediate sync on startup (tests, staged rollouts).
    pub disable_initial_sync: bool,
    /// Override the env-provided sync interval when set.
    pub sync_interval: Option<Duration>,
}

/// Load `.env.local` / `.env` unless disabled via `MEW_DOTENV`.
pub fn load_dotenv() {
    let flag = std::env::var("MEW_DOTENV").unwrap_or_default();
    if matches!(flag.trim().to_ascii_lowercase().as_str(), "0" | "false" | "off" | "no") {
        return;
    }
    for name in [".env.local", ".env"] {
        match dotenvy::from_filename(name) {
            Ok(path) => tracing::info!(path = %path.display(), "loaded env file"),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(file = name, error = %e, "failed to load env file"),
        }
    }
}

/// Run the supervisor loop until the token is cancelled.
///
/// The caller loads the [`RuntimeConfig`] first (after dotenv) because
/// runner factories usually need it too.
pub async fn run_service(
    cancel: CancellationToken,
    mut cfg: RuntimeConfig,
    opts: ServiceOptions,
    factory: Arc<dyn RunnerFactory>,
) -> Result<()> {
    if let Some(interval) = opts.sync_interval {
        cfg.sync_interval = interval;
    }

    let http = build_client(&ClientOptions {
        proxy: ProxyMode::from_env()?,
        ..ClientOptions::default()
    })?;
    let admin = AdminClient::new(&cfg.api_base, &cfg.admin_secret, http)?;

    let registration = ServiceTypeRegistration {
        service_type: cfg.service_type.clone(),
        server_name: opts.server_name,
        icon: opts.icon,
        description: opts.description,
        config_template: opts.config_template,
    };

    let manager = BotManager::new(admin, registration, factory);

    tracing::info!(
        service_type = %cfg.service_type,
        api_base = %cfg.api_base,
        sync_interval_secs = cfg.sync_interval.as_secs(),
        "service starting"
    );

    if !opts.disable_initial_sync {
        if let Err(e) = manager.sync_once(&cancel).await {
            tracing::warn!(error = %e, "initial sync failed");
        }
    }

    let mut ticker = tokio::time::interval(cfg.sync_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = manager.sync_once(&cancel).await {
                    tracing::warn!(error = %e, "sync failed");
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("shutting down");
                manager.stop_all().await;
                return Ok(());
            }
        }
    }
}

/// Full service entrypoint: signal handling plus the supervisor loop.
/// Call [`load_dotenv`] before building the config.
pub async fn run_service_with_signals(
    cfg: RuntimeConfig,
    opts: ServiceOptions,
    factory: Arc<dyn RunnerFactory>,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    run_service(cancel, cfg, opts, factory).await
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
