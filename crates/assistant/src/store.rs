//! On-disk layout for per-user assistant state.
//!
//! `users/<userId>/{metadata,facts,summaries,proactive}.json` under the
//! bot's state directory. All writes are atomic via the sdk store; callers
//! hold the user's lock around load-mutate-save sequences.

use std::path::PathBuf;

use mew_domain::error::Result;
use mew_sdk::store::{load_json, save_json, StateStore};

use crate::memory::{FactsFile, Metadata, ProactiveQueueFile, SummariesFile};

#[derive(Debug, Clone)]
pub struct UserPaths {
    pub user_dir: PathBuf,
    pub metadata: PathBuf,
    pub facts: PathBuf,
    pub summaries: PathBuf,
    pub proactive: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UserStateStore {
    store: StateStore,
    bot_id: String,
}

impl UserStateStore {
    pub fn new(store: StateStore, bot_id: &str) -> Self {
        Self { store, bot_id: bot_id.trim().to_owned() }
    }

    pub fn paths(&self, user_id: &str) -> UserPaths {
        let user_dir = self.store.user_dir(&self.bot_id, user_id);
        UserPaths {
            metadata: user_dir.join("metadata.json"),
            facts: user_dir.join("facts.json"),
            summaries: user_dir.join("summaries.json"),
            proactive: user_dir.join("proactive.json"),
            user_dir,
        }
    }

    pub fn known_user_ids(&self) -> Vec<String> {
        self.store.known_user_ids(&self.bot_id)
    }

    pub fn load_metadata(&self, user_id: &str) -> Result<Metadata> {
        let meta: Metadata = load_json(&self.paths(user_id).metadata)?;
        Ok(meta.normalized())
    }

    pub fn save_metadata(&self, user_id: &str, meta: &Metadata) -> Result<()> {
        let normalized = meta.clone().normalized();
        save_json(&self.paths(user_id).metadata, &normalized)
    }

    pub fn load_facts(&self, user_id: &str) -> Result<FactsFile> {
        load_json(&self.paths(user_id).facts)
    }

    pub fn save_facts(&self, user_id: &str, facts: &FactsFile) -> Result<()> {
        save_json(&self.paths(user_id).facts, facts)
    }

    pub fn load_summaries(&self, user_id: &str) -> Result<SummariesFile> {
        load_json(&self.paths(user_id).summaries)
    }

    pub fn save_summaries(&self, user_id: &str, summaries: &SummariesFile) -> Result<()> {
        save_json(&self.paths(user_id).summaries, summaries)
    }

    pub fn load_proactive(&self, user_id: &str) -> Result<ProactiveQueueFile> {
        load_json(&self.paths(user_id).proactive)
    }

    pub fn save_proactive(&self, user_id: &str, queue: &ProactiveQueueFile) -> Result<()> {
        save_json(&self.paths(user_id).proactive, queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Mood;

    fn store_in(dir: &std::path::Path) -> UserStateStore {
        UserStateStore::new(StateStore::new(dir.to_str().unwrap(), "assistant-agent"), "B1")
    }

    #[test]
    fn paths_follow_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let paths = store.paths("U1");
        assert!(paths.metadata.ends_with("assistant-agent/B1/users/U1/metadata.json"));
        assert!(paths.proactive.ends_with("assistant-agent/B1/users/U1/proactive.json"));
    }

    #[test]
    fn missing_metadata_loads_normalized_default() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let meta = store.load_metadata("U1").unwrap();
        assert_eq!(meta.baseline_mood, Mood::baseline());
        assert!(meta.record_id.is_empty());
    }

    #[test]
    fn metadata_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let mut meta = store.load_metadata("U1").unwrap();
        meta.record_id = "R1".into();
        meta.channel_id = "C1".into();
        meta.final_mood = Mood { valence: 0.5, arousal: 0.2 };
        store.save_metadata("U1", &meta).unwrap();

        let loaded = store.load_metadata("U1").unwrap();
        assert_eq!(loaded.record_id, "R1");
        assert_eq!(loaded.final_mood, Mood { valence: 0.5, arousal: 0.2 });
        // User becomes discoverable by the periodic jobs.
        assert_eq!(store.known_user_ids(), vec!["U1"]);
    }
}
