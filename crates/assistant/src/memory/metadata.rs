//! Per-user session metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mood::Mood;

/// Mutated by every inbound message and by the periodic jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "session_start_datetime", default)]
    pub session_start_datetime: String,
    #[serde(rename = "time_since_last_message", default)]
    pub time_since_last_message: String,
    #[serde(rename = "user_activity_frequency", default)]
    pub user_activity_frequency: String,

    #[serde(rename = "initial_mood", default)]
    pub initial_mood: Mood,
    #[serde(rename = "final_mood", default)]
    pub final_mood: Mood,
    #[serde(rename = "baseline_mood", default)]
    pub baseline_mood: Mood,

    #[serde(rename = "recordId", default)]
    pub record_id: String,
    #[serde(rename = "startAt", default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastMessageAt", default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(rename = "channelId", default)]
    pub channel_id: String,

    #[serde(rename = "lastSummarizedRecordId", default)]
    pub last_summarized_record_id: String,
    #[serde(rename = "lastFactRecordId", default)]
    pub last_fact_record_id: String,
    #[serde(rename = "lastFactProcessedAt", default)]
    pub last_fact_processed_at: Option<DateTime<Utc>>,
}

impl Metadata {
    /// Normalize a freshly loaded value: a zero baseline becomes the
    /// long-term default so old files and new users agree.
    pub fn normalized(mut self) -> Self {
        if self.baseline_mood.is_zero() {
            self.baseline_mood = Mood::baseline();
        }
        self
    }

    /// The final mood to decay from; a zero value falls back to baseline.
    pub fn effective_final_mood(&self) -> Mood {
        if self.final_mood.is_zero() {
            self.baseline_mood
        } else {
            self.final_mood
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_fills_baseline() {
        let meta = Metadata::default().normalized();
        assert_eq!(meta.baseline_mood, Mood::baseline());
    }

    #[test]
    fn normalization_preserves_explicit_baseline() {
        let meta = Metadata {
            baseline_mood: Mood { valence: -0.5, arousal: 0.3 },
            ..Default::default()
        }
        .normalized();
        assert_eq!(meta.baseline_mood, Mood { valence: -0.5, arousal: 0.3 });
    }

    #[test]
    fn effective_final_falls_back_to_baseline() {
        let meta = Metadata::default().normalized();
        assert_eq!(meta.effective_final_mood(), Mood::baseline());

        let meta = Metadata {
            final_mood: Mood { valence: 0.9, arousal: 0.8 },
            ..Default::default()
        }
        .normalized();
        assert_eq!(meta.effective_final_mood(), Mood { valence: 0.9, arousal: 0.8 });
    }

    #[test]
    fn save_load_round_trip_preserves_logical_value() {
        let meta = Metadata {
            record_id: "R1".into(),
            channel_id: "C1".into(),
            last_summarized_record_id: "R0".into(),
            ..Default::default()
        }
        .normalized();
        let json = serde_json::to_string(&meta).unwrap();
        let loaded: Metadata = serde_json::from_str(&json).unwrap();
        let loaded = loaded.normalized();
        assert_eq!(loaded.record_id, "R1");
        assert_eq!(loaded.baseline_mood, meta.baseline_mood);
    }
}
