//! Layered prompt assembly.
//!
//! L1 is the persona system prompt; L2 session metadata, L3 facts, and L4
//! summaries combine into the first user message; L5 is the current-session
//! transcript with roles inferred from authorship and images materialized
//! as data-URL content parts.

use chrono::{DateTime, FixedOffset, Utc};

use mew_domain::error::Result;
use mew_domain::types::{AttachmentRef, ChannelMessage};
use mew_llm::{ChatMessage, ContentPart};

use crate::constants::{
    DEFAULT_IMAGE_PROMPT, MAX_IMAGE_BYTES, MAX_TOTAL_IMAGE_BYTES, PROACTIVE_TOKEN_PREFIX,
    SILENCE_TOKEN, TOOL_CALL_PREFIX, WANT_MORE_TOKEN,
};
use crate::memory::{facts::format_facts_for_context, summaries::format_summaries_for_context};
use crate::memory::{FactsFile, Metadata, SummariesFile};

/// The default persona, used when the bot directory carries no
/// `prompt/system_prompt.txt` override.
const EMBEDDED_PERSONA: &str = include_str!("prompts/system_prompt.txt");
/// Control-token contract shown to the model ahead of the memory layers.
const EMBEDDED_INSTRUCTIONS: &str = include_str!("prompts/instruct_prompt.txt");

/// Read the persona prompt, preferring on-disk overrides (first match
/// wins), and substitute `{{USER_INTERESTS}}`.
pub fn load_persona(override_paths: &[std::path::PathBuf], user_interests: &str) -> String {
    let mut persona = String::new();
    for path in override_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let trimmed = content.trim();
            if !trimmed.is_empty() {
                persona = trimmed.to_owned();
                break;
            }
        }
    }
    if persona.is_empty() {
        persona = EMBEDDED_PERSONA.trim().to_owned();
    }

    let interests = user_interests.trim();
    let interests = if interests.is_empty() { "(not configured)" } else { interests };
    persona.replace("{{USER_INTERESTS}}", interests)
}

/// The developer-instruction header with token placeholders substituted.
pub fn developer_instructions() -> String {
    EMBEDDED_INSTRUCTIONS
        .trim()
        .replace("{{SILENCE_TOKEN}}", SILENCE_TOKEN)
        .replace("{{WANT_MORE_TOKEN}}", WANT_MORE_TOKEN)
        .replace("{{PROACTIVE_TOKEN_PREFIX}}", PROACTIVE_TOKEN_PREFIX)
        .replace("{{TOOL_CALL_TOKEN_PREFIX}}", TOOL_CALL_PREFIX)
}

/// Compose L2 metadata + L3 facts + L4 summaries under the developer
/// instructions; delivered as the first user message of every turn.
pub fn build_l1l4_user_prompt(
    instructions: &str,
    meta: &Metadata,
    facts: &FactsFile,
    summaries: &SummariesFile,
) -> String {
    let mut out = String::new();
    out.push_str(instructions.trim());
    out.push_str("\n\n### L2 Session Metadata\n");
    out.push_str(&format!(
        "session_start_datetime: {}\n",
        meta.session_start_datetime.trim()
    ));
    out.push_str(&format!(
        "time_since_last_message: {}\n",
        meta.time_since_last_message.trim()
    ));
    out.push_str(&format!(
        "user_activity_frequency: {}\n",
        meta.user_activity_frequency.trim()
    ));
    out.push_str(&format!(
        "initial_mood: {{\"valence\": {:.4}, \"arousal\": {:.4}}}\n",
        meta.initial_mood.valence, meta.initial_mood.arousal
    ));
    out.push_str("\n### L3 User Memory (Facts)\n");
    out.push_str(&format_facts_for_context(facts));
    out.push_str("\n\n### L4 Recent Summaries\n");
    out.push_str(&format_summaries_for_context(summaries));
    out.trim().to_owned()
}

/// Sanitize a value embedded into the speaker metadata line: no newlines,
/// quotes, or angle brackets, capped at 80 chars.
fn sanitize_meta_attr(value: &str) -> String {
    let mut cleaned: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '\r' | '\n' | '\t' => ' ',
            '"' => '\'',
            '<' => '(',
            '>' => ')',
            other => other,
        })
        .collect();
    if cleaned.chars().count() > 80 {
        cleaned = cleaned.chars().take(80).collect();
    }
    cleaned.trim().to_owned()
}

/// `<mew_speaker username=".." user_id=".." time="HH:MM"/>`
pub fn speaker_meta_line(
    username: &str,
    user_id: &str,
    sent_at: Option<DateTime<Utc>>,
    tz: FixedOffset,
) -> String {
    let mut username = sanitize_meta_attr(username);
    if username.is_empty() {
        username = "unknown".to_owned();
    }
    let mut user_id = sanitize_meta_attr(user_id);
    if user_id.is_empty() {
        user_id = "unknown".to_owned();
    }
    match sent_at {
        Some(ts) => {
            let local = ts.with_timezone(&tz);
            format!(
                r#"<mew_speaker username="{username}" user_id="{user_id}" time="{}"/>"#,
                local.format("%H:%M")
            )
        }
        None => format!(r#"<mew_speaker username="{username}" user_id="{user_id}"/>"#),
    }
}

fn wrap_user_text(msg: &ChannelMessage, tz: FixedOffset) -> String {
    let meta = speaker_meta_line(msg.author_username(), msg.author_id(), msg.created_at, tz);
    let text = msg.content.trim();
    if text.is_empty() {
        meta
    } else {
        format!("{meta}\n{text}")
    }
}

/// Text-only L5: one chat message per transcript line, bot-authored turns
/// as assistant.
pub fn build_l5_messages(
    session_msgs: &[ChannelMessage],
    bot_user_id: &str,
    tz: FixedOffset,
) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(session_msgs.len());
    for msg in session_msgs {
        let is_bot = msg.author_id().trim() == bot_user_id.trim();
        let content = msg.content.trim();
        if is_bot {
            if !content.is_empty() {
                out.push(ChatMessage::assistant(content));
            }
        } else {
            out.push(ChatMessage::user(wrap_user_text(msg, tz)));
        }
    }
    out
}

/// Downloads an attachment's bytes, already capped by the caller's limit.
#[async_trait::async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn download(&self, msg: &ChannelMessage, att: &AttachmentRef, limit: usize)
        -> Result<Vec<u8>>;
}

/// L5 with image attachments materialized into data-URL parts.
///
/// Caps: per-image and total byte budgets; once the total budget is spent,
/// remaining images degrade to text-only. A user message with images but no
/// text gets the default image prompt.
pub async fn build_l5_messages_with_attachments(
    session_msgs: &[ChannelMessage],
    bot_user_id: &str,
    tz: FixedOffset,
    fetcher: &dyn AttachmentFetcher,
) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(session_msgs.len());
    let mut total_image_bytes = 0usize;

    for msg in session_msgs {
        let is_bot = msg.author_id().trim() == bot_user_id.trim();
        if is_bot {
            let content = msg.content.trim();
            if !content.is_empty() {
                out.push(ChatMessage::assistant(content));
            }
            continue;
        }

        let images: Vec<&AttachmentRef> =
            msg.attachments.iter().filter(|a| a.is_image()).collect();
        if images.is_empty() {
            out.push(ChatMessage::user(wrap_user_text(msg, tz)));
            continue;
        }

        let mut parts = Vec::new();
        let text = msg.content.trim();
        let header = speaker_meta_line(msg.author_username(), msg.author_id(), msg.created_at, tz);
        let text_part = if text.is_empty() {
            format!("{header}\n{DEFAULT_IMAGE_PROMPT}")
        } else {
            format!("{header}\n{text}")
        };
        parts.push(ContentPart::Text { text: text_part });

        for att in images {
            if total_image_bytes >= MAX_TOTAL_IMAGE_BYTES {
                break;
            }
            let budget = MAX_IMAGE_BYTES.min(MAX_TOTAL_IMAGE_BYTES - total_image_bytes);
            match fetcher.download(msg, att, budget).await {
                Ok(bytes) => {
                    total_image_bytes += bytes.len();
                    parts.push(ContentPart::image_bytes(&att.content_type, &bytes));
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %msg.id,
                        filename = %att.filename,
                        error = %e,
                        "image download failed, falling back to text"
                    );
                }
            }
        }

        out.push(ChatMessage::user_parts(parts));
    }
    out
}

/// Flat transcript rendering used for summarization, fact extraction, and
/// tool results: `[id] timestamp author: text` lines.
pub fn format_session_record(msgs: &[ChannelMessage]) -> String {
    if msgs.is_empty() {
        return "(empty)".to_owned();
    }
    let mut lines = Vec::with_capacity(msgs.len());
    for msg in msgs {
        let ts = msg.created_at.map(|t| t.to_rfc3339()).unwrap_or_default();
        let mut author = msg.author_username().trim().to_owned();
        if author.is_empty() {
            author = msg.author_id().trim().to_owned();
        }
        if author.is_empty() {
            author = "unknown".to_owned();
        }
        lines.push(format!("[{}] {} {}: {}", msg.id.trim(), ts, author, msg.content.trim()));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Mood;
    use crate::session::tests::msg;
    use mew_domain::error::Error;
    use mew_llm::MessageContent;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn persona_substitutes_interests() {
        let persona = load_persona(&[], "astronomy, cooking");
        assert!(persona.contains("astronomy, cooking"));
        assert!(!persona.contains("{{USER_INTERESTS}}"));

        let fallback = load_persona(&[], "  ");
        assert!(fallback.contains("(not configured)"));
    }

    #[test]
    fn persona_override_file_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("system_prompt.txt");
        std::fs::write(&path, "You are {{USER_INTERESTS}} incarnate.").unwrap();
        let persona = load_persona(&[path], "tea");
        assert_eq!(persona, "You are tea incarnate.");
    }

    #[test]
    fn instructions_substitute_all_tokens() {
        let text = developer_instructions();
        assert!(text.contains(SILENCE_TOKEN));
        assert!(text.contains(WANT_MORE_TOKEN));
        assert!(text.contains(PROACTIVE_TOKEN_PREFIX));
        assert!(text.contains(TOOL_CALL_PREFIX));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn l1l4_contains_every_layer() {
        let meta = Metadata {
            session_start_datetime: "2026-08-07 10:00".into(),
            time_since_last_message: "~5m".into(),
            user_activity_frequency: "Active 3 days in the last 7".into(),
            initial_mood: Mood { valence: 0.25, arousal: 0.5 },
            ..Default::default()
        };
        let prompt = build_l1l4_user_prompt("INSTR", &meta, &FactsFile::default(), &SummariesFile::default());
        assert!(prompt.starts_with("INSTR"));
        assert!(prompt.contains("session_start_datetime: 2026-08-07 10:00"));
        assert!(prompt.contains("initial_mood: {\"valence\": 0.2500, \"arousal\": 0.5000}"));
        assert!(prompt.contains("### L3 User Memory (Facts)\n(none)"));
        assert!(prompt.contains("### L4 Recent Summaries\n(none)"));
    }

    #[test]
    fn speaker_meta_sanitizes_attrs() {
        let line = speaker_meta_line("ka\"na\n<x>", "U1", None, tz());
        assert_eq!(line, r#"<mew_speaker username="ka'na (x)" user_id="U1"/>"#);
    }

    #[test]
    fn speaker_meta_formats_local_time() {
        let ts = DateTime::from_timestamp(0, 0).unwrap();
        let line = speaker_meta_line("kana", "U1", Some(ts), tz());
        assert!(line.contains(r#"time="08:00""#));
    }

    #[test]
    fn l5_roles_follow_authorship() {
        let msgs = vec![msg("M1", 100, "U1"), msg("M2", 200, "B1"), msg("M3", 300, "U1")];
        let l5 = build_l5_messages(&msgs, "B1", tz());
        assert_eq!(l5.len(), 3);
        assert_eq!(l5[0].role, mew_llm::Role::User);
        assert_eq!(l5[1].role, mew_llm::Role::Assistant);
        assert!(l5[0].text().contains("<mew_speaker"));
        assert!(!l5[1].text().contains("<mew_speaker"));
    }

    struct NoImages;

    #[async_trait::async_trait]
    impl AttachmentFetcher for NoImages {
        async fn download(
            &self,
            _msg: &ChannelMessage,
            _att: &AttachmentRef,
            _limit: usize,
        ) -> Result<Vec<u8>> {
            Err(Error::NotFound("no".into()))
        }
    }

    struct TinyImages;

    #[async_trait::async_trait]
    impl AttachmentFetcher for TinyImages {
        async fn download(
            &self,
            _msg: &ChannelMessage,
            _att: &AttachmentRef,
            _limit: usize,
        ) -> Result<Vec<u8>> {
            Ok(vec![0u8; 16])
        }
    }

    fn with_image(mut m: ChannelMessage) -> ChannelMessage {
        m.attachments.push(AttachmentRef {
            filename: "pic.png".into(),
            content_type: "image/png".into(),
            size: 16,
            key: "k1".into(),
            url: String::new(),
        });
        m.content = String::new();
        m
    }

    #[tokio::test]
    async fn image_message_gets_default_prompt_and_part() {
        let msgs = vec![with_image(msg("M1", 100, "U1"))];
        let l5 = build_l5_messages_with_attachments(&msgs, "B1", tz(), &TinyImages).await;
        assert_eq!(l5.len(), 1);
        match &l5[0].content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[0], ContentPart::Text { text } if text.contains(DEFAULT_IMAGE_PROMPT)));
                assert!(matches!(&parts[1], ContentPart::ImageUrl { .. }));
            }
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_image_download_degrades_to_text() {
        let msgs = vec![with_image(msg("M1", 100, "U1"))];
        let l5 = build_l5_messages_with_attachments(&msgs, "B1", tz(), &NoImages).await;
        match &l5[0].content {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 1),
            other => panic!("expected parts, got {other:?}"),
        }
    }

    #[test]
    fn record_formatting_includes_ids() {
        assert_eq!(format_session_record(&[]), "(empty)");
        let text = format_session_record(&[msg("M1", 100, "U1")]);
        assert!(text.starts_with("[M1] "));
        assert!(text.contains("msg M1"));
    }
}
