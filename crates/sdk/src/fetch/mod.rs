//! Generic fetcher engine: poll a source, dedupe via the seen-set, publish
//! new items, persist state.
//!
//! Each task pairs one source identity with one webhook. Source-specific
//! fetching/parsing and card construction live behind the `Source` and
//! `Publisher` traits; the engine owns ordering, first-run bootstrap,
//! dedupe, and state persistence.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use mew_client::webhook::MediaCache;
use mew_domain::error::{Error, Result};

use crate::seen::SeenSet;
use crate::store::{load_json, save_json};

/// Conditional-fetch state handed to the source (`If-None-Match` /
/// `If-Modified-Since`).
#[derive(Debug, Clone, Default)]
pub struct Conditional {
    pub etag: String,
    pub last_modified: String,
}

/// One item discovered by a source. `data` is opaque to the engine and is
/// handed to the publisher unchanged.
#[derive(Debug, Clone)]
pub struct FetchItem {
    pub id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub data: serde_json::Value,
}

/// Result of one source fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Conditional fetch short-circuit; nothing changed upstream.
    pub not_modified: bool,
    pub etag: String,
    pub last_modified: String,
    pub items: Vec<FetchItem>,
}

#[async_trait::async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, conditional: &Conditional) -> Result<FetchOutcome>;
}

/// Builds and posts the webhook card for one item (uploading referenced
/// media through the task's media cache on the way).
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, cancel: &CancellationToken, item: &FetchItem) -> Result<()>;
}

/// Persisted task state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskState {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,
    #[serde(default)]
    pub seen: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct FetchWorkerOptions {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    /// When false, the very first poll of a fresh task only primes the
    /// seen-set and posts nothing.
    pub send_history_on_start: bool,
    /// Only the newest N unseen items are posted per cycle.
    pub max_items_per_poll: usize,
    pub seen_cap: usize,
}

impl Default for FetchWorkerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(45),
            send_history_on_start: false,
            max_items_per_poll: 5,
            seen_cap: crate::seen::DEFAULT_SEEN_CAP,
        }
    }
}

/// Pick the unseen items to post this cycle: chronological (oldest first),
/// original order as tiebreak and for undated items, newest `max` kept.
pub fn select_new_items<'a>(
    items: &'a [FetchItem],
    seen: &SeenSet,
    max: usize,
) -> Vec<&'a FetchItem> {
    let mut dated: Vec<(usize, &FetchItem)> = items
        .iter()
        .enumerate()
        .filter(|(_, it)| seen.is_new(&it.id))
        .collect();

    dated.sort_by(|(ai, a), (bi, b)| match (a.timestamp, b.timestamp) {
        (Some(ta), Some(tb)) => ta.cmp(&tb).then(ai.cmp(bi)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => ai.cmp(bi),
    });

    let max = max.max(1);
    if dated.len() > max {
        dated.drain(..dated.len() - max);
    }
    dated.into_iter().map(|(_, it)| it).collect()
}

/// One fetcher task: a source plus a publisher plus persisted state.
pub struct FetchWorker {
    state_path: PathBuf,
    opts: FetchWorkerOptions,
    source: Box<dyn Source>,
    publisher: Box<dyn Publisher>,
    media_cache: MediaCache,

    seen: SeenSet,
    etag: String,
    last_modified: String,
    first_run: bool,
    fresh_state: bool,
}

impl FetchWorker {
    pub fn new(
        state_path: PathBuf,
        opts: FetchWorkerOptions,
        source: Box<dyn Source>,
        publisher: Box<dyn Publisher>,
        media_cache: MediaCache,
    ) -> Result<Self> {
        let fresh_state = !state_path.exists();
        let state: TaskState = load_json(&state_path)?;
        let seen = SeenSet::restore(opts.seen_cap, &state.seen);
        media_cache.restore(&state.media);

        Ok(Self {
            state_path,
            opts,
            source,
            publisher,
            media_cache,
            seen,
            etag: state.etag,
            last_modified: state.last_modified,
            first_run: true,
            fresh_state,
        })
    }

    /// Run poll cycles until cancelled. The first cycle fires immediately.
    pub async fn run(mut self, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.cycle(&cancel).await {
            tracing::warn!(error = %e, "fetch cycle failed");
        }

        let mut ticker = tokio::time::interval(self.opts.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.cycle(&cancel).await {
                        tracing::warn!(error = %e, "fetch cycle failed");
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }

    /// One poll cycle. A fetch error skips the cycle and keeps all state.
    pub async fn cycle(&mut self, cancel: &CancellationToken) -> Result<()> {
        let conditional =
            Conditional { etag: self.etag.clone(), last_modified: self.last_modified.clone() };

        let outcome = tokio::select! {
            res = tokio::time::timeout(self.opts.fetch_timeout, self.source.fetch(&conditional)) => {
                match res {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(Error::Http("source fetch timeout".into())),
                }
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        if outcome.not_modified {
            self.first_run = false;
            return Ok(());
        }

        if !outcome.etag.trim().is_empty() {
            self.etag = outcome.etag.trim().to_owned();
        }
        if !outcome.last_modified.trim().is_empty() {
            self.last_modified = outcome.last_modified.trim().to_owned();
        }

        if outcome.items.is_empty() {
            self.save()?;
            return Ok(());
        }

        if self.first_run && self.fresh_state && !self.opts.send_history_on_start {
            for item in &outcome.items {
                self.seen.insert(&item.id);
            }
            self.save()?;
            tracing::info!(items = outcome.items.len(), "first run: seen-set primed, nothing posted");
            self.first_run = false;
            return Ok(());
        }
        self.first_run = false;

        let selected: Vec<FetchItem> =
            select_new_items(&outcome.items, &self.seen, self.opts.max_items_per_poll)
                .into_iter()
                .cloned()
                .collect();

        for item in &selected {
            if cancel.is_cancelled() {
                break;
            }
            self.seen.insert(&item.id);
            if let Err(e) = self.publisher.publish(cancel, item).await {
                tracing::warn!(item_id = %item.id, error = %e, "publish failed, continuing");
            }
        }

        self.save()?;
        Ok(())
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    fn save(&self) -> Result<()> {
        let state = TaskState {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
            seen: self.seen.snapshot(),
            media: self.media_cache.snapshot(),
        };
        save_json(&self.state_path, &state)
    }
}
