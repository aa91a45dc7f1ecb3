//! Bot supervisor: reconcile the set of running workers against the control
//! plane's bootstrap list.
//!
//! A bot is either running with configuration hash `H` or not running;
//! every transition passes through stop-then-start. Start and stop happen
//! outside the internal lock so a slow runner constructor or teardown never
//! blocks other bots or a concurrent sync.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mew_client::admin::{AdminClient, ServiceTypeRegistration};
use mew_domain::error::{Error, Result};
use mew_domain::types::BootstrapBot;

use crate::store::sha256_hex;

/// One bot worker. `run` owns the bot's whole lifetime and returns when the
/// token is cancelled or the worker hits a fatal error.
#[async_trait::async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Builds a runner for a single bot instance. A constructor error (invalid
/// config) skips that bot until the next sync.
pub trait RunnerFactory: Send + Sync {
    fn create(&self, bot: &BootstrapBot) -> Result<Arc<dyn Runner>>;
}

struct RunningBot {
    config_hash: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The reconciliation decision for one sync cycle.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Bots to start (fresh or reloaded), with their config hashes.
    pub starts: Vec<(BootstrapBot, String)>,
    /// Ids of currently running workers that must stop first.
    pub stop_ids: Vec<String>,
}

/// Pure diff: compare running (id -> config hash) against the bootstrap
/// list.
pub fn plan_sync(running: &HashMap<String, String>, bots: &[BootstrapBot]) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let mut seen: HashMap<&str, ()> = HashMap::with_capacity(bots.len());

    for bot in bots {
        seen.insert(bot.id.as_str(), ());
        let hash = sha256_hex(&bot.config);
        match running.get(&bot.id) {
            Some(existing) if *existing == hash => {}
            Some(_) => {
                plan.stop_ids.push(bot.id.clone());
                plan.starts.push((bot.clone(), hash));
            }
            None => {
                plan.starts.push((bot.clone(), hash));
            }
        }
    }

    for id in running.keys() {
        if !seen.contains_key(id.as_str()) {
            plan.stop_ids.push(id.clone());
        }
    }

    plan
}

pub struct BotManager {
    admin: AdminClient,
    registration: ServiceTypeRegistration,
    factory: Arc<dyn RunnerFactory>,
    bots: Mutex<HashMap<String, RunningBot>>,
}

impl BotManager {
    pub fn new(
        admin: AdminClient,
        registration: ServiceTypeRegistration,
        factory: Arc<dyn RunnerFactory>,
    ) -> Self {
        Self {
            admin,
            registration: registration.normalized(),
            factory,
            bots: Mutex::new(HashMap::new()),
        }
    }

    pub fn running_count(&self) -> usize {
        self.bots.lock().len()
    }

    /// One reconciliation cycle: register, fetch bootstrap, diff, apply.
    ///
    /// A bootstrap fetch error aborts the cycle and leaves running workers
    /// untouched.
    pub async fn sync_once(&self, ctx: &CancellationToken) -> Result<()> {
        self.admin.register_service_type(&self.registration).await?;
        let bots = self.admin.bootstrap_bots(&self.registration.service_type).await?;

        let stops: Vec<(String, RunningBot)>;
        let starts: Vec<(BootstrapBot, String)>;
        {
            let mut running = self.bots.lock();
            let hashes: HashMap<String, String> =
                running.iter().map(|(id, rb)| (id.clone(), rb.config_hash.clone())).collect();
            let plan = plan_sync(&hashes, &bots);

            stops = plan
                .stop_ids
                .iter()
                .filter_map(|id| running.remove_entry(id))
                .collect();
            starts = plan.starts;
        }

        for (id, rb) in stops {
            tracing::info!(bot_id = %id, "stopping bot");
            stop_worker(rb).await;
        }

        for (bot, hash) in starts {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let runner = match self.factory.create(&bot) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(bot_id = %bot.id, name = %bot.name, error = %e, "invalid bot config, skipping");
                    continue;
                }
            };

            tracing::info!(bot_id = %bot.id, name = %bot.name, "starting bot");
            let cancel = ctx.child_token();
            let worker_cancel = cancel.clone();
            let bot_id = bot.id.clone();
            let bot_name = bot.name.clone();
            let handle = tokio::spawn(async move {
                match runner.run(worker_cancel).await {
                    Ok(()) | Err(Error::Cancelled) => {}
                    Err(e) => {
                        tracing::error!(bot_id = %bot_id, name = %bot_name, error = %e, "bot crashed");
                    }
                }
            });

            let mut running = self.bots.lock();
            running.insert(bot.id, RunningBot { config_hash: hash, cancel, handle });
        }

        Ok(())
    }

    /// Stop every running worker and wait for termination.
    pub async fn stop_all(&self) {
        let to_stop: Vec<(String, RunningBot)> = {
            let mut running = self.bots.lock();
            running.drain().collect()
        };
        for (id, rb) in to_stop {
            tracing::info!(bot_id = %id, "stopping bot");
            stop_worker(rb).await;
        }
    }
}

async fn stop_worker(rb: RunningBot) {
    rb.cancel.cancel();
    if let Err(e) = rb.handle.await {
        if e.is_panic() {
            tracing::error!(error = %e, "bot worker panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot(id: &str, config: &str) -> BootstrapBot {
        BootstrapBot {
            id: id.into(),
            name: format!("bot-{id}"),
            config: config.into(),
            access_token: "tok".into(),
            service_type: "test".into(),
            dm_enabled: true,
        }
    }

    #[test]
    fn new_bots_are_started() {
        let plan = plan_sync(&HashMap::new(), &[bot("B1", "{}")]);
        assert_eq!(plan.starts.len(), 1);
        assert!(plan.stop_ids.is_empty());
        assert_eq!(plan.starts[0].1, sha256_hex("{}"));
    }

    #[test]
    fn unchanged_config_is_a_noop() {
        let mut running = HashMap::new();
        running.insert("B1".to_owned(), sha256_hex("{}"));
        let plan = plan_sync(&running, &[bot("B1", "{}")]);
        assert!(plan.starts.is_empty());
        assert!(plan.stop_ids.is_empty());
    }

    #[test]
    fn changed_config_stops_then_starts() {
        let mut running = HashMap::new();
        running.insert("B1".to_owned(), sha256_hex("{}"));
        let plan = plan_sync(&running, &[bot("B1", r#"{"model":"x"}"#)]);
        assert_eq!(plan.stop_ids, vec!["B1"]);
        assert_eq!(plan.starts.len(), 1);
    }

    #[test]
    fn removed_bot_is_stopped() {
        let mut running = HashMap::new();
        running.insert("B1".to_owned(), sha256_hex("{}"));
        running.insert("B2".to_owned(), sha256_hex("{}"));
        let plan = plan_sync(&running, &[bot("B1", "{}")]);
        assert_eq!(plan.stop_ids, vec!["B2"]);
        assert!(plan.starts.is_empty());
    }

    #[test]
    fn mixed_plan_covers_all_transitions() {
        let mut running = HashMap::new();
        running.insert("keep".to_owned(), sha256_hex("{}"));
        running.insert("reload".to_owned(), sha256_hex("old"));
        running.insert("gone".to_owned(), sha256_hex("{}"));
        let plan = plan_sync(&running, &[bot("keep", "{}"), bot("reload", "new"), bot("fresh", "{}")]);

        let mut stop_ids = plan.stop_ids.clone();
        stop_ids.sort();
        assert_eq!(stop_ids, vec!["gone", "reload"]);

        let mut start_ids: Vec<&str> = plan.starts.iter().map(|(b, _)| b.id.as_str()).collect();
        start_ids.sort();
        assert_eq!(start_ids, vec!["fresh", "reload"]);
    }
}
