//! Leading-mention detection for guild-channel routing.

use regex::Regex;

/// Matches and strips a leading `<@botId>` / `<@!botId>` mention.
///
/// Built once per runner (the bot id never changes within a worker), no lazy
/// global regex cache.
pub struct MentionStripper {
    re: Regex,
}

impl MentionStripper {
    pub fn new(bot_user_id: &str) -> Self {
        let escaped = regex::escape(bot_user_id.trim());
        // Leading whitespace before the mention is tolerated.
        let re = Regex::new(&format!(r"^\s*<@!?{escaped}>\s*")).expect("static mention pattern");
        Self { re }
    }

    /// If `content` starts with a mention of this bot, return the remainder.
    pub fn strip(&self, content: &str) -> (String, bool) {
        match self.re.find(content) {
            Some(m) => (content[m.end()..].trim().to_owned(), true),
            None => (content.trim().to_owned(), false),
        }
    }
}
