//! One fetcher bot: a set of feed tasks, each polling on its own interval.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mew_client::devmode::DevMode;
use mew_client::webhook::MediaCache;
use mew_domain::config::RuntimeConfig;
use mew_domain::error::Result;
use mew_domain::types::BootstrapBot;
use mew_sdk::fetch::{FetchWorker, FetchWorkerOptions};
use mew_sdk::proxy::ProxyPool;
use mew_sdk::store::StateStore;
use mew_sdk::supervisor::{Runner, RunnerFactory};
use mew_sdk::TaskGroup;

use crate::config::{decode_tasks, TaskConfig};
use crate::publish::FeedPublisher;
use crate::source::JsonFeedSource;

pub struct FeedRunnerFactory {
    runtime: RuntimeConfig,
    http: reqwest::Client,
    proxy_pool: Option<Arc<ProxyPool>>,
}

impl FeedRunnerFactory {
    pub fn new(
        runtime: RuntimeConfig,
        http: reqwest::Client,
        proxy_pool: Option<Arc<ProxyPool>>,
    ) -> Self {
        Self { runtime, http, proxy_pool }
    }
}

impl RunnerFactory for FeedRunnerFactory {
    fn create(&self, bot: &BootstrapBot) -> Result<Arc<dyn Runner>> {
        let tasks = decode_tasks(&bot.config)?;
        Ok(Arc::new(FeedRunner {
            bot_id: bot.id.clone(),
            tasks,
            runtime: self.runtime.clone(),
            http: self.http.clone(),
            proxy_pool: self.proxy_pool.clone(),
        }))
    }
}

pub struct FeedRunner {
    bot_id: String,
    tasks: Vec<TaskConfig>,
    runtime: RuntimeConfig,
    http: reqwest::Client,
    proxy_pool: Option<Arc<ProxyPool>>,
}

#[async_trait::async_trait]
impl Runner for FeedRunner {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if self.tasks.is_empty() {
            tracing::info!(bot_id = %self.bot_id, "no tasks configured, idling");
            cancel.cancelled().await;
            return Ok(());
        }

        let store = StateStore::new(&self.runtime.state_dir, &self.runtime.service_type);
        let dev = DevMode::from_env();
        let mut group = TaskGroup::new(cancel);

        for (index, task) in self.tasks.iter().enumerate() {
            let state_path = store.task_state_file(&self.bot_id, index, &task.identity());
            let media_cache = MediaCache::default();

            let source = JsonFeedSource::new(self.http.clone(), &task.feed_url);
            let publisher = FeedPublisher {
                http: self.http.clone(),
                api_base: self.runtime.api_base.clone(),
                webhook_url: task.webhook_url.clone(),
                media_cache: media_cache.clone(),
                dev: dev.clone(),
                username: task.username.clone(),
                avatar_url: task.avatar_url.clone(),
                proxy_pool: self.proxy_pool.clone(),
            };

            let worker = FetchWorker::new(
                state_path,
                FetchWorkerOptions {
                    interval: Duration::from_secs(task.interval_seconds),
                    send_history_on_start: task.send_history_on_start,
                    max_items_per_poll: task.max_items_per_poll,
                    seen_cap: task.seen_cap,
                    ..Default::default()
                },
                Box::new(source),
                Box::new(publisher),
                media_cache,
            )?;

            tracing::info!(
                bot_id = %self.bot_id,
                task = index,
                feed_url = %task.feed_url,
                interval_secs = task.interval_seconds,
                "feed task starting"
            );
            group.spawn(move |token| worker.run(token));
        }

        group.wait().await;
        Ok(())
    }
}
