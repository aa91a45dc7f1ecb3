//! Per-bot JSON state files with atomic writes.
//!
//! Layout: `<state_dir>/<serviceType>/<botId>/...`. Writers go through
//! `tmp` + `rename` so a reader never observes a partial file; readers may
//! see a stale file, which every consumer tolerates.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use mew_domain::error::Result;

/// Resolves state paths for one service type.
#[derive(Debug, Clone)]
pub struct StateStore {
    base: PathBuf,
    service_type: String,
}

impl StateStore {
    pub fn new(state_dir: &str, service_type: &str) -> Self {
        Self { base: PathBuf::from(state_dir), service_type: service_type.trim().to_owned() }
    }

    /// `<state_dir>/<serviceType>/<botId>`
    pub fn bot_dir(&self, bot_id: &str) -> PathBuf {
        self.base.join(&self.service_type).join(bot_id.trim())
    }

    /// `<bot_dir>/users/<userId>`
    pub fn user_dir(&self, bot_id: &str, user_id: &str) -> PathBuf {
        self.bot_dir(bot_id).join("users").join(user_id.trim())
    }

    /// `<bot_dir>/task-<index>-<sha256(identity) first 12 hex>.json`
    pub fn task_state_file(&self, bot_id: &str, index: usize, identity: &str) -> PathBuf {
        let digest = Sha256::digest(identity.trim().as_bytes());
        let prefix = &hex::encode(digest)[..12];
        self.bot_dir(bot_id).join(format!("task-{index}-{prefix}.json"))
    }

    /// Enumerate user ids that have state on disk (directory names).
    pub fn known_user_ids(&self, bot_id: &str) -> Vec<String> {
        let users_dir = self.bot_dir(bot_id).join("users");
        let Ok(entries) = std::fs::read_dir(&users_dir) else {
            return Vec::new();
        };
        let mut out: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.trim().is_empty())
            .collect();
        out.sort();
        out
    }
}

/// Load a JSON file, returning `T::default()` when the file does not exist.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write a JSON file atomically (`<path>.tmp` then rename).
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, body)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Hex-encoded SHA-256 of a config blob, the supervisor's change detector.
pub fn sha256_hex(s: &str) -> String {
    hex::encode(Sha256::digest(s.as_bytes()))
}
