//! Dev-mode recording.
//!
//! When enabled (`DEV_MODE` truthy or `MEW_DEV_DIR` set), webhook posts and
//! uploads are written under `<dir>/webhook/...` instead of touching the
//! network. Constructed once at startup and passed down; never consulted
//! through globals.

use std::path::{Path, PathBuf};

use chrono::Utc;
use mew_domain::error::Result;

/// Dev-mode settings resolved at startup.
#[derive(Debug, Clone, Default)]
pub struct DevMode {
    dir: Option<PathBuf>,
}

impl DevMode {
    /// Resolve from the environment. `MEW_DEV_DIR` implies enabled;
    /// `DEV_MODE=1|true|on|yes` enables with the default `dev` directory.
    pub fn from_env() -> Self {
        let dir = std::env::var("MEW_DEV_DIR").ok().map(|s| s.trim().to_owned()).filter(|s| !s.is_empty());
        if let Some(dir) = dir {
            return Self { dir: Some(PathBuf::from(dir)) };
        }
        let flag = std::env::var("DEV_MODE").unwrap_or_default();
        match flag.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Self { dir: Some(PathBuf::from("dev")) },
            _ => Self { dir: None },
        }
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Record a webhook post body to disk. Returns the file path written.
    pub fn record_webhook(&self, service_type: &str, body: &[u8]) -> Result<PathBuf> {
        let base = self.dir.as_deref().unwrap_or(Path::new("dev"));
        let dir = base.join("webhook").join("post");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{service_type}-{}.json", timestamp_id()));
        std::fs::write(&path, body)?;
        Ok(path)
    }

    /// Record an upload's bytes to disk and return a dev storage key.
    pub fn record_upload(
        &self,
        service_type: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<(PathBuf, String)> {
        let base = self.dir.as_deref().unwrap_or(Path::new("dev"));
        let dir = base.join("webhook").join("upload");
        std::fs::create_dir_all(&dir)?;
        let name = format!("{service_type}-{}-{}", timestamp_id(), sanitize_filename(filename));
        let path = dir.join(&name);
        std::fs::write(&path, data)?;
        let key = format!("dev/webhook/upload/{name}");
        Ok((path, key))
    }
}

fn timestamp_id() -> String {
    Utc::now().format("%Y%m%d%H%M%S%3f").to_string()
}

/// Keep only filename-safe characters.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "file".to_owned()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize_filename("a b/c.png"), "a_b_c.png");
        assert_eq!(sanitize_filename("  "), "file");
        assert_eq!(sanitize_filename("ok-1_2.jpg"), "ok-1_2.jpg");
    }

    #[test]
    fn records_upload_under_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dev = DevMode { dir: Some(tmp.path().to_path_buf()) };
        let (path, key) = dev.record_upload("feed-fetcher", "img.png", b"abc").unwrap();
        assert!(path.exists());
        assert!(key.starts_with("dev/webhook/upload/feed-fetcher-"));
        assert!(key.ends_with("img.png"));
    }
}
