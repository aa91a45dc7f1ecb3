//! Per-user session summaries: append-only, one per record, FIFO-capped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::next_two_digit_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    #[serde(rename = "summaryId")]
    pub summary_id: String,
    #[serde(rename = "recordId")]
    pub record_id: String,
    pub summary: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummariesFile {
    #[serde(default)]
    pub summaries: Vec<Summary>,
}

pub fn next_summary_id(summaries: &[Summary]) -> String {
    let candidate = next_two_digit_id('S', summaries.iter().map(|s| s.summary_id.clone()));
    if !summaries.iter().any(|s| s.summary_id.eq_ignore_ascii_case(&candidate)) {
        return candidate;
    }
    // Clamped at S99 with the slot taken: recycle a number freed by the
    // FIFO trim so ids stay unique.
    for n in 1..=99u32 {
        let id = format!("S{n:02}");
        if !summaries.iter().any(|s| s.summary_id.eq_ignore_ascii_case(&id)) {
            return id;
        }
    }
    candidate
}

/// Append a summary for a record. A record that already has one is a no-op;
/// past the cap the oldest entries are trimmed.
pub fn append_summary(
    now: DateTime<Utc>,
    mut file: SummariesFile,
    record_id: &str,
    summary_text: &str,
    max_summaries: usize,
) -> SummariesFile {
    let record_id = record_id.trim();
    let summary_text = summary_text.trim();
    if record_id.is_empty() || summary_text.is_empty() {
        return file;
    }
    if file.summaries.iter().any(|s| s.record_id == record_id) {
        return file;
    }

    file.summaries.push(Summary {
        summary_id: next_summary_id(&file.summaries),
        record_id: record_id.to_owned(),
        summary: summary_text.to_owned(),
        created_at: now,
    });
    if max_summaries > 0 && file.summaries.len() > max_summaries {
        let excess = file.summaries.len() - max_summaries;
        file.summaries.drain(..excess);
    }
    file
}

/// Render summaries as `ID: text (RecordID=...)` lines; `(none)` when empty.
pub fn format_summaries_for_context(file: &SummariesFile) -> String {
    let mut lines = Vec::new();
    for item in &file.summaries {
        let id = item.summary_id.trim();
        let text = item.summary.trim();
        if id.is_empty() || text.is_empty() {
            continue;
        }
        let record_id = item.record_id.trim();
        if record_id.is_empty() {
            lines.push(format!("{id}: {text}"));
        } else {
            lines.push(format!("{id}: {text} (RecordID={record_id})"));
        }
    }
    if lines.is_empty() {
        "(none)".to_owned()
    } else {
        lines.join("\n")
    }
}

/// Summaries created in `(start, end]`, oldest first, capped at `max`
/// newest. Used as intermediate context for proactive sends.
pub fn summaries_between(
    file: &SummariesFile,
    start: Option<DateTime<Utc>>,
    end: DateTime<Utc>,
    max: usize,
) -> Vec<Summary> {
    let mut items: Vec<Summary> = file
        .summaries
        .iter()
        .filter(|s| !s.summary.trim().is_empty())
        .filter(|s| start.map(|t| s.created_at >= t).unwrap_or(true))
        .filter(|s| s.created_at <= end)
        .cloned()
        .collect();
    items.sort_by_key(|s| s.created_at);
    let max = max.max(1);
    if items.len() > max {
        items.drain(..items.len() - max);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_SUMMARIES;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn append_allocates_ids_and_dedups_by_record() {
        let file = append_summary(ts(10), SummariesFile::default(), "R1", "first", MAX_SUMMARIES);
        let file = append_summary(ts(20), file, "R2", "second", MAX_SUMMARIES);
        assert_eq!(file.summaries[0].summary_id, "S01");
        assert_eq!(file.summaries[1].summary_id, "S02");

        let same = append_summary(ts(30), file.clone(), "R1", "changed", MAX_SUMMARIES);
        assert_eq!(same.summaries.len(), 2);
        assert_eq!(same.summaries[0].summary, "first");
    }

    #[test]
    fn cap_trims_oldest() {
        let mut file = SummariesFile::default();
        for i in 0..5 {
            file = append_summary(ts(i), file, &format!("R{i}"), &format!("s{i}"), 3);
        }
        assert_eq!(file.summaries.len(), 3);
        assert_eq!(file.summaries[0].record_id, "R2");
    }

    #[test]
    fn blank_inputs_are_ignored() {
        let file = append_summary(ts(1), SummariesFile::default(), " ", "text", 10);
        assert!(file.summaries.is_empty());
        let file = append_summary(ts(1), file, "R1", "  ", 10);
        assert!(file.summaries.is_empty());
    }

    #[test]
    fn between_window_selects_and_caps() {
        let mut file = SummariesFile::default();
        for i in 0..6 {
            file = append_summary(ts(i * 100), file, &format!("R{i}"), &format!("s{i}"), 30);
        }
        let picked = summaries_between(&file, Some(ts(150)), ts(450), 2);
        let ids: Vec<&str> = picked.iter().map(|s| s.record_id.as_str()).collect();
        assert_eq!(ids, ["R3", "R4"]);
    }

    #[test]
    fn context_formatting_includes_record_id() {
        let file = append_summary(ts(1), SummariesFile::default(), "R1", "talked a lot", 10);
        assert_eq!(format_summaries_for_context(&file), "S01: talked a lot (RecordID=R1)");
        assert_eq!(format_summaries_for_context(&SummariesFile::default()), "(none)");
    }
}
