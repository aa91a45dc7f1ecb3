//! Per-bot assistant configuration, parsed from the opaque config blob the
//! control plane hands to the supervisor.

use serde::{Deserialize, Serialize};

use mew_domain::error::{Error, Result};
use mew_domain::util::resolve_utc_offset_secs;
use mew_llm::LlmConfig;

/// Raw config blob shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    /// IANA name or fixed offset; empty means UTC+8.
    #[serde(default)]
    pub timezone: String,
    /// Substituted into the persona's `{{USER_INTERESTS}}` placeholder.
    #[serde(default)]
    pub user_interests: String,
    /// Keywords that trigger a synchronous fact-extraction pass. Defaults to
    /// "记住" and "remember".
    #[serde(default)]
    pub remember_keywords: Vec<String>,
}

impl AssistantConfig {
    /// Parse the bootstrap config blob. Empty/`null`/`{}` yields defaults;
    /// malformed JSON is a configuration error that skips this bot.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "null" || raw == "{}" {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid bot config JSON: {e}")))
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
        }
    }

    /// Resolved UTC offset for presenting timestamps to the LLM.
    pub fn utc_offset(&self) -> Result<chrono::FixedOffset> {
        let secs = resolve_utc_offset_secs(&self.timezone).map_err(Error::Config)?;
        chrono::FixedOffset::east_opt(secs)
            .ok_or_else(|| Error::Config(format!("timezone offset out of range: {secs}")))
    }

    /// Active remember-trigger keywords, lower-cased.
    pub fn remember_keywords(&self) -> Vec<String> {
        let configured: Vec<String> = self
            .remember_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if configured.is_empty() {
            vec!["记住".to_owned(), "remember".to_owned()]
        } else {
            configured
        }
    }
}

/// JSON template shown by the control plane when creating a bot of this
/// type.
pub fn config_template() -> String {
    serde_json::to_string_pretty(&AssistantConfig {
        base_url: "https://api.openai.com/v1".into(),
        api_key: "sk-...".into(),
        model: "gpt-4o-mini".into(),
        timezone: "+08:00".into(),
        user_interests: String::new(),
        remember_keywords: Vec::new(),
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blob_parses_to_defaults() {
        for raw in ["", "  ", "null", "{}"] {
            let cfg = AssistantConfig::parse(raw).unwrap();
            assert!(cfg.api_key.is_empty());
        }
    }

    #[test]
    fn malformed_blob_is_config_error() {
        assert!(matches!(AssistantConfig::parse("{nope"), Err(Error::Config(_))));
    }

    #[test]
    fn full_blob_round_trips() {
        let cfg = AssistantConfig::parse(
            r#"{"base_url":"https://llm.example/v1","api_key":"sk-1","model":"m","timezone":"+09:00","user_interests":"astronomy"}"#,
        )
        .unwrap();
        assert_eq!(cfg.model, "m");
        assert_eq!(cfg.utc_offset().unwrap().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn remember_keywords_default_and_override() {
        let cfg = AssistantConfig::default();
        assert_eq!(cfg.remember_keywords(), vec!["记住", "remember"]);

        let cfg = AssistantConfig {
            remember_keywords: vec![" Note This ".into(), String::new()],
            ..Default::default()
        };
        assert_eq!(cfg.remember_keywords(), vec!["note this"]);
    }
}
