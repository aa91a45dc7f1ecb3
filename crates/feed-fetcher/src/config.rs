//! Per-bot task configuration for the feed fetcher.
//!
//! The config blob is either a bare JSON array of tasks or an object with a
//! `tasks` array. Each task pairs one feed URL with one webhook.

use serde::{Deserialize, Serialize};

use mew_domain::error::{Error, Result};

fn default_interval_seconds() -> u64 {
    300
}

fn default_max_items_per_poll() -> usize {
    5
}

fn default_seen_cap() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub feed_url: String,
    pub webhook_url: String,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub send_history_on_start: bool,
    #[serde(default = "default_max_items_per_poll")]
    pub max_items_per_poll: usize,
    #[serde(default = "default_seen_cap")]
    pub seen_cap: usize,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar_url: String,
}

impl TaskConfig {
    pub fn validate(&self) -> Result<()> {
        for (label, raw) in [("feed_url", &self.feed_url), ("webhook_url", &self.webhook_url)] {
            let parsed = url::Url::parse(raw.trim())
                .map_err(|e| Error::Config(format!("invalid {label} {raw:?}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::Config(format!("{label} must be http(s): {raw:?}")));
            }
        }
        if self.interval_seconds == 0 {
            return Err(Error::Config("interval_seconds must be positive".into()));
        }
        Ok(())
    }

    /// Stable identity for the task's state file name.
    pub fn identity(&self) -> String {
        format!("{}|{}", self.feed_url.trim(), self.webhook_url.trim())
    }
}

/// Decode the config blob into tasks.
pub fn decode_tasks(raw: &str) -> Result<Vec<TaskConfig>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Ok(Vec::new());
    }

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(default)]
        tasks: Vec<TaskConfig>,
    }

    let tasks: Vec<TaskConfig> = if raw.starts_with('[') {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid task list: {e}")))?
    } else {
        let wrapper: Wrapper = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid config JSON: {e}")))?;
        wrapper.tasks
    };

    for task in &tasks {
        task.validate()?;
    }
    Ok(tasks)
}

/// JSON template shown by the control plane when creating a bot.
pub fn config_template() -> String {
    serde_json::to_string_pretty(&serde_json::json!({
        "tasks": [{
            "feed_url": "https://example.com/feed.json",
            "webhook_url": "http://localhost:3000/api/webhooks/...",
            "interval_seconds": 300,
            "send_history_on_start": false,
            "max_items_per_poll": 5,
        }]
    }))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_array_and_wrapped_forms_decode() {
        let bare = r#"[{"feed_url":"https://f.example/a.json","webhook_url":"https://h.example/w"}]"#;
        assert_eq!(decode_tasks(bare).unwrap().len(), 1);

        let wrapped = r#"{"tasks":[{"feed_url":"https://f.example/a.json","webhook_url":"https://h.example/w"}]}"#;
        let tasks = decode_tasks(wrapped).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].interval_seconds, 300);
        assert_eq!(tasks[0].max_items_per_poll, 5);
    }

    #[test]
    fn empty_blob_is_no_tasks() {
        assert!(decode_tasks("").unwrap().is_empty());
        assert!(decode_tasks("null").unwrap().is_empty());
    }

    #[test]
    fn invalid_webhook_url_is_config_error() {
        let raw = r#"[{"feed_url":"https://f.example/a.json","webhook_url":"not a url"}]"#;
        assert!(matches!(decode_tasks(raw), Err(Error::Config(_))));

        let ftp = r#"[{"feed_url":"ftp://f.example/a","webhook_url":"https://h.example/w"}]"#;
        assert!(matches!(decode_tasks(ftp), Err(Error::Config(_))));
    }

    #[test]
    fn identity_is_stable_per_pair() {
        let task: TaskConfig = serde_json::from_str(
            r#"{"feed_url":"https://f.example/a.json","webhook_url":"https://h.example/w"}"#,
        )
        .unwrap();
        assert_eq!(task.identity(), "https://f.example/a.json|https://h.example/w");
    }
}
