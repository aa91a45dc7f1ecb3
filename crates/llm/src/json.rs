//! Minimal JSON extraction from untrusted LLM text.
//!
//! Models wrap structured output in prose and code fences. This scanner
//! strips a fence if present, then falls back to the widest `{...}` or
//! `[...]` span. It deliberately avoids being a general parser; the caller
//! still runs serde on the result.

/// Extract the most plausible JSON block from free-form model output.
pub fn extract_json_block(s: &str) -> String {
    let mut raw = s.trim();
    if raw.is_empty() {
        return String::new();
    }

    if let Some(stripped) = raw.strip_prefix("```") {
        let mut rest = stripped.trim_start();
        // Drop the language tag line (e.g. ```json).
        if let Some(idx) = rest.find('\n') {
            let first_line = &rest[..idx];
            if !first_line.trim_start().starts_with(['{', '[']) {
                rest = &rest[idx + 1..];
            }
        }
        if let Some(idx) = rest.rfind("```") {
            rest = &rest[..idx];
        }
        raw = rest.trim();
    }

    if raw.starts_with('{') || raw.starts_with('[') {
        return raw.to_owned();
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            return raw[start..=end].trim().to_owned();
        }
    }
    if let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) {
        if end > start {
            return raw[start..=end].trim().to_owned();
        }
    }
    raw.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_passes_through() {
        assert_eq!(extract_json_block(r#"{"a":1}"#), r#"{"a":1}"#);
        assert_eq!(extract_json_block(r#"["x"]"#), r#"["x"]"#);
    }

    #[test]
    fn code_fence_is_stripped() {
        let fenced = "```json\n{\"facts\": [\"likes tea\"]}\n```";
        assert_eq!(extract_json_block(fenced), r#"{"facts": ["likes tea"]}"#);
    }

    #[test]
    fn surrounding_prose_is_tolerated() {
        let noisy = "Sure! Here is the result: {\"facts\": []} hope it helps";
        assert_eq!(extract_json_block(noisy), r#"{"facts": []}"#);
    }

    #[test]
    fn empty_input_yields_empty() {
        assert_eq!(extract_json_block("   "), "");
    }
}
