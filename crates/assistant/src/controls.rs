//! Deterministic parsing of LLM control tokens.
//!
//! Every model output is untrusted text. Control directives sit on the tail
//! lines of the reply (`<WANT_MORE>`, `<PROACTIVE>{json}`), the mood line
//! can appear anywhere (`final_mood: {json}`), and a tool request owns the
//! first line (`TOOL_CALL: {json}`). Parsing trims after each recognition
//! and stops at the first non-control line, so prose can never be eaten.

use regex::Regex;
use serde::Deserialize;

use crate::constants::{PROACTIVE_TOKEN_PREFIX, SILENCE_TOKEN, TOOL_CALL_PREFIX, WANT_MORE_TOKEN};
use crate::memory::Mood;
use mew_llm::extract_json_block;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProactiveDirective {
    #[serde(default)]
    pub delay_seconds: i32,
    #[serde(default)]
    pub delay_minutes: i32,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyControls {
    pub want_more: bool,
    pub proactive: Option<ProactiveDirective>,
}

impl ReplyControls {
    pub fn is_empty(&self) -> bool {
        !self.want_more && self.proactive.is_none()
    }
}

/// Strip trailing control lines off a reply. Idempotent: parsing the
/// cleaned text again produces empty controls.
pub fn parse_reply_controls(reply: &str) -> (String, ReplyControls) {
    let normalized = reply.replace("\r\n", "\n");
    let mut lines: Vec<&str> = normalized.split('\n').collect();
    let mut controls = ReplyControls::default();

    loop {
        let Some(last_idx) = lines.iter().rposition(|l| !l.trim().is_empty()) else {
            break;
        };
        let tail = lines[last_idx].trim();

        if tail == WANT_MORE_TOKEN {
            controls.want_more = true;
            lines.remove(last_idx);
            continue;
        }
        if let Some(raw) = tail.strip_prefix(PROACTIVE_TOKEN_PREFIX) {
            let raw = raw.trim();
            if !raw.is_empty() && controls.proactive.is_none() {
                if let Ok(mut directive) = serde_json::from_str::<ProactiveDirective>(raw) {
                    directive.delay_seconds = directive.delay_seconds.max(0);
                    directive.delay_minutes = directive.delay_minutes.max(0);
                    directive.reason = directive.reason.trim().to_owned();
                    controls.proactive = Some(directive);
                }
            }
            lines.remove(last_idx);
            continue;
        }
        break;
    }

    (lines.join("\n").trim().to_owned(), controls)
}

/// `<SILENCE>` anywhere in the final text suppresses the whole reply.
pub fn is_silence(reply: &str) -> bool {
    let trimmed = reply.trim();
    trimmed.is_empty() || trimmed.contains(SILENCE_TOKEN)
}

/// A tool request parsed off the first line of a model response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// Detect `TOOL_CALL: {"tool": ..., "args": {...}}` on the first line. The
/// JSON may spill onto following lines; the minimal block scanner picks it
/// up either way.
pub fn parse_tool_call(output: &str) -> Option<ToolCall> {
    let trimmed = output.trim();
    let first_line = trimmed.lines().next()?.trim();
    if !first_line.starts_with(TOOL_CALL_PREFIX) {
        return None;
    }

    let after = trimmed.split_once(TOOL_CALL_PREFIX)?.1;
    let raw = extract_json_block(after);
    let parsed: ToolCall = serde_json::from_str(&raw).ok()?;
    if parsed.tool.trim().is_empty() {
        return None;
    }
    Some(ToolCall { tool: parsed.tool.trim().to_owned(), args: parsed.args })
}

/// Extract and strip a `final_mood: {...}` span. Applying the function to
/// its own cleaned output is the identity.
pub fn extract_and_strip_final_mood(content: &str) -> (String, Option<Mood>) {
    // Compiled per call; the reasoning loop runs this a handful of times
    // per message, well off any hot path.
    let re = Regex::new(r"(?is)\bfinal_mood\s*:\s*(\{[^}]*\})").expect("static mood pattern");
    let s = content.trim();

    let Some(caps) = re.captures(s) else {
        return (s.to_owned(), None);
    };
    let Ok(mood) = serde_json::from_str::<Mood>(&caps[1]) else {
        return (s.to_owned(), None);
    };

    let whole = caps.get(0).expect("matched");
    let clean = format!("{}{}", &s[..whole.start()], &s[whole.end()..]);
    (clean.trim().to_owned(), Some(mood))
}
