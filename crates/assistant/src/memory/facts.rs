//! Per-user fact store: LRU-capped, case-insensitive content dedup,
//! two-digit id allocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::next_two_digit_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    #[serde(rename = "factId")]
    pub fact_id: String,
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastAccessedAt", default)]
    pub last_accessed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactsFile {
    #[serde(default)]
    pub facts: Vec<Fact>,
}

pub fn next_fact_id(facts: &[Fact]) -> String {
    let candidate = next_two_digit_id('F', facts.iter().map(|f| f.fact_id.clone()));
    if !facts.iter().any(|f| f.fact_id.eq_ignore_ascii_case(&candidate)) {
        return candidate;
    }
    // Allocation clamped at F99 and the slot is taken: recycle the lowest
    // number freed by LRU eviction so ids stay unique.
    for n in 1..=99u32 {
        let id = format!("F{n:02}");
        if !facts.iter().any(|f| f.fact_id.eq_ignore_ascii_case(&id)) {
            return id;
        }
    }
    candidate
}

/// Keep the `cap` most-recently-accessed facts. Never-accessed facts sort
/// first (oldest-created first among them), so they evict before anything
/// with a real access time.
pub fn apply_lru_cap(mut facts: Vec<Fact>, cap: usize) -> Vec<Fact> {
    if cap == 0 || facts.len() <= cap {
        return facts;
    }
    facts.sort_by(|a, b| match (a.last_accessed_at, b.last_accessed_at) {
        (None, None) => a.created_at.cmp(&b.created_at),
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    });
    facts.split_off(facts.len() - cap)
}

/// Promote any fact whose content appears as a substring of `content`.
/// Returns how many facts were touched.
pub fn touch_facts_by_content(facts: &mut [Fact], content: &str, now: DateTime<Utc>) -> usize {
    let haystack = content.trim();
    if haystack.is_empty() {
        return 0;
    }
    let mut touched = 0;
    for fact in facts.iter_mut() {
        let needle = fact.content.trim();
        if !needle.is_empty() && haystack.contains(needle) {
            fact.last_accessed_at = Some(now);
            touched += 1;
        }
    }
    touched
}

/// Promote facts whose ids appear in the LLM's `used_fact_ids` list
/// (case-insensitive).
pub fn touch_facts_by_ids(facts: &mut [Fact], ids: &[String], now: DateTime<Utc>) {
    if facts.is_empty() || ids.is_empty() {
        return;
    }
    let wanted: Vec<String> = ids
        .iter()
        .map(|id| id.trim().to_ascii_uppercase())
        .filter(|id| !id.is_empty())
        .collect();
    if wanted.is_empty() {
        return;
    }
    for fact in facts.iter_mut() {
        let id = fact.fact_id.trim().to_ascii_uppercase();
        if !id.is_empty() && wanted.contains(&id) {
            fact.last_accessed_at = Some(now);
        }
    }
}

/// Insert new facts, deduplicating by lower-cased trimmed content, then
/// apply the LRU cap.
pub fn upsert_facts(
    now: DateTime<Utc>,
    mut file: FactsFile,
    new_facts: &[String],
    max_facts: usize,
) -> FactsFile {
    let mut existing: Vec<String> = file
        .facts
        .iter()
        .map(|f| f.content.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    for raw in new_facts {
        let content = raw.trim();
        if content.is_empty() {
            continue;
        }
        let key = content.to_lowercase();
        if existing.contains(&key) {
            continue;
        }
        existing.push(key);
        file.facts.push(Fact {
            fact_id: next_fact_id(&file.facts),
            content: content.to_owned(),
            created_at: now,
            last_accessed_at: Some(now),
        });
    }

    file.facts = apply_lru_cap(file.facts, max_facts);
    file
}

/// Render facts as `ID: content` lines for the prompt; `(none)` when empty.
pub fn format_facts_for_context(file: &FactsFile) -> String {
    let mut lines = Vec::new();
    for fact in &file.facts {
        let id = fact.fact_id.trim();
        let content = fact.content.trim();
        if id.is_empty() || content.is_empty() {
            continue;
        }
        lines.push(format!("{id}: {content}"));
    }
    if lines.is_empty() {
        "(none)".to_owned()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_FACTS;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn fact(id: &str, content: &str, created: i64, accessed: Option<i64>) -> Fact {
        Fact {
            fact_id: id.into(),
            content: content.into(),
            created_at: ts(created),
            last_accessed_at: accessed.map(ts),
        }
    }

    #[test]
    fn upsert_allocates_sequential_ids() {
        let file = upsert_facts(
            ts(1000),
            FactsFile::default(),
            &["likes tea".into(), "plays go".into()],
            MAX_FACTS,
        );
        assert_eq!(file.facts[0].fact_id, "F01");
        assert_eq!(file.facts[1].fact_id, "F02");
    }

    #[test]
    fn upsert_dedup_is_case_insensitive() {
        let file = upsert_facts(ts(1000), FactsFile::default(), &["Likes Tea".into()], MAX_FACTS);
        let file = upsert_facts(ts(2000), file, &["likes tea".into(), "  likes tea ".into()], MAX_FACTS);
        assert_eq!(file.facts.len(), 1);
    }

    #[test]
    fn fact_ids_stay_unique_under_cap() {
        let mut file = FactsFile::default();
        for i in 0..40 {
            file = upsert_facts(ts(1000 + i), file, &[format!("fact number {i}")], MAX_FACTS);
        }
        assert!(file.facts.len() <= MAX_FACTS);
        let mut ids: Vec<&str> = file.facts.iter().map(|f| f.fact_id.as_str()).collect();
        ids.sort();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before, "fact ids must stay distinct");
    }

    #[test]
    fn id_overflow_recycles_evicted_slots() {
        // Two facts survive at the cap boundary: F98 and F99. The next
        // allocation clamps to F99, which is taken, so a freed low number
        // is recycled instead of duplicating F99.
        let file = FactsFile {
            facts: vec![
                fact("F98", "old fact", 10, Some(100)),
                fact("F99", "newer fact", 20, Some(200)),
            ],
        };
        let file = upsert_facts(ts(1000), file, &["brand new".into()], MAX_FACTS);
        let mut ids: Vec<&str> = file.facts.iter().map(|f| f.fact_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, ["F01", "F98", "F99"]);
    }

    #[test]
    fn lru_cap_evicts_never_accessed_first() {
        let facts = vec![
            fact("F01", "accessed late", 10, Some(500)),
            fact("F02", "never accessed old", 20, None),
            fact("F03", "never accessed new", 30, None),
            fact("F04", "accessed early", 40, Some(100)),
        ];
        let kept = apply_lru_cap(facts, 2);
        let ids: Vec<&str> = kept.iter().map(|f| f.fact_id.as_str()).collect();
        assert_eq!(ids, ["F04", "F01"]);
    }

    #[test]
    fn touch_by_content_requires_substring() {
        let mut facts = vec![fact("F01", "likes tea", 10, None), fact("F02", "plays go", 10, None)];
        let touched = touch_facts_by_content(&mut facts, "yes, the user likes tea a lot", ts(999));
        assert_eq!(touched, 1);
        assert_eq!(facts[0].last_accessed_at, Some(ts(999)));
        assert_eq!(facts[1].last_accessed_at, None);

        assert_eq!(touch_facts_by_content(&mut facts, "  ", ts(999)), 0);
    }

    #[test]
    fn touch_by_ids_is_case_insensitive() {
        let mut facts = vec![fact("F01", "a", 10, None), fact("F02", "b", 10, None)];
        touch_facts_by_ids(&mut facts, &["f01".into(), " ".into()], ts(999));
        assert_eq!(facts[0].last_accessed_at, Some(ts(999)));
        assert_eq!(facts[1].last_accessed_at, None);
    }

    #[test]
    fn context_formatting() {
        assert_eq!(format_facts_for_context(&FactsFile::default()), "(none)");
        let file = FactsFile { facts: vec![fact("F01", "likes tea", 10, None)] };
        assert_eq!(format_facts_for_context(&file), "F01: likes tea");
    }
}
