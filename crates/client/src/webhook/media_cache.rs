//! Bounded remote-URL to storage-key cache.
//!
//! Fetcher tasks re-encounter the same media URLs every poll; uploading them
//! once and remembering the storage key keeps webhook cycles cheap. The map
//! is insertion-ordered with FIFO eviction and serializes to a plain vec of
//! pairs so it survives restarts inside the task state file.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_MEDIA_CACHE_CAP: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    url: String,
    key: String,
}

/// Bounded URL -> storage key map with FIFO eviction.
#[derive(Clone)]
pub struct MediaCache {
    cap: usize,
    inner: Arc<Mutex<VecDeque<Entry>>>,
}

impl MediaCache {
    pub fn new(cap: usize) -> Self {
        Self { cap: cap.max(1), inner: Arc::new(Mutex::new(VecDeque::new())) }
    }

    pub fn get(&self, url: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner.iter().find(|e| e.url == url).map(|e| e.key.clone())
    }

    /// Insert a mapping; a duplicate URL updates the key in place without
    /// changing its position.
    pub fn put(&self, url: &str, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.iter_mut().find(|e| e.url == url) {
            existing.key = key.to_owned();
            return;
        }
        inner.push_back(Entry { url: url.to_owned(), key: key.to_owned() });
        while inner.len() > self.cap {
            inner.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Snapshot as (url, key) pairs in insertion order, for persistence.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.inner.lock().iter().map(|e| (e.url.clone(), e.key.clone())).collect()
    }

    /// Restore from persisted pairs, keeping at most `cap` newest entries.
    pub fn restore(&self, pairs: &[(String, String)]) {
        let mut inner = self.inner.lock();
        inner.clear();
        for (url, key) in pairs {
            if url.trim().is_empty() || key.trim().is_empty() {
                continue;
            }
            inner.push_back(Entry { url: url.clone(), key: key.clone() });
        }
        while inner.len() > self.cap {
            inner.pop_front();
        }
    }
}

impl Default for MediaCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEDIA_CACHE_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_eviction_drops_oldest() {
        let cache = MediaCache::new(2);
        cache.put("u1", "k1");
        cache.put("u2", "k2");
        cache.put("u3", "k3");
        assert_eq!(cache.get("u1"), None);
        assert_eq!(cache.get("u2"), Some("k2".into()));
        assert_eq!(cache.get("u3"), Some("k3".into()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn duplicate_put_updates_in_place() {
        let cache = MediaCache::new(2);
        cache.put("u1", "k1");
        cache.put("u1", "k1b");
        assert_eq!(cache.get("u1"), Some("k1b".into()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn snapshot_round_trips() {
        let cache = MediaCache::new(4);
        cache.put("u1", "k1");
        cache.put("u2", "k2");
        let snap = cache.snapshot();

        let restored = MediaCache::new(4);
        restored.restore(&snap);
        assert_eq!(restored.get("u1"), Some("k1".into()));
        assert_eq!(restored.get("u2"), Some("k2".into()));
        assert_eq!(restored.snapshot(), snap);
    }
}
