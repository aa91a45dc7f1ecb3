//! Session segmentation over paginated channel history.
//!
//! A session record is a maximal run of messages in one channel where
//! consecutive messages are at most `SESSION_GAP` apart, capped at
//! `MAX_SESSION_MESSAGES`. The record id is the id of the session's first
//! (oldest) message. Sessions are derived on demand from the server's
//! descending history pages; nothing is cached.

use chrono::{DateTime, Duration, Utc};

use mew_client::channels::{fetch_channel_messages, filter_retracted, search_channel_messages};
use mew_client::BotSession;
use mew_domain::error::{Error, Result};
use mew_domain::types::ChannelMessage;

use crate::constants::{
    ACTIVITY_WINDOW_DAYS, FETCH_PAGE_SIZE, MAX_FETCH_PAGES, MAX_SESSION_MESSAGES, SESSION_GAP,
};

/// One page of descending channel history. Abstracted so the segmentation
/// logic is testable without a server.
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    async fn page(&self, channel_id: &str, limit: usize, before: &str)
        -> Result<Vec<ChannelMessage>>;

    async fn search(
        &self,
        channel_id: &str,
        query: &str,
        limit: usize,
        page: usize,
    ) -> Result<Vec<ChannelMessage>>;
}

/// Server-backed history source.
pub struct MewHistorySource {
    session: BotSession,
}

impl MewHistorySource {
    pub fn new(session: BotSession) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl HistorySource for MewHistorySource {
    async fn page(
        &self,
        channel_id: &str,
        limit: usize,
        before: &str,
    ) -> Result<Vec<ChannelMessage>> {
        let msgs = fetch_channel_messages(&self.session, channel_id, limit, before).await?;
        Ok(filter_retracted(msgs))
    }

    async fn search(
        &self,
        channel_id: &str,
        query: &str,
        limit: usize,
        page: usize,
    ) -> Result<Vec<ChannelMessage>> {
        let msgs = search_channel_messages(&self.session, channel_id, query, limit, page).await?;
        Ok(filter_retracted(msgs))
    }
}

fn gap_exceeded(newer: &ChannelMessage, older: &ChannelMessage, gap: Duration) -> bool {
    match (newer.created_at, older.created_at) {
        // Unknown timestamps cannot prove a boundary.
        (Some(n), Some(o)) => n.signed_duration_since(o) > gap,
        _ => false,
    }
}

/// How many of the descending messages belong to the current (youngest)
/// session. Returns the count and whether a session boundary was found.
pub fn current_session_count_in_desc(
    desc: &[ChannelMessage],
    gap: Duration,
    max: usize,
) -> (usize, bool) {
    if desc.is_empty() {
        return (0, false);
    }
    let mut count = 1usize;
    for pair in desc.windows(2) {
        if count >= max {
            return (max, false);
        }
        if gap_exceeded(&pair[0], &pair[1], gap) {
            return (count, true);
        }
        count += 1;
    }
    (count.min(max), false)
}

/// Split chronologically ordered messages into gap-bounded sessions.
pub fn split_sessions_chronological(
    chrono_msgs: &[ChannelMessage],
    gap: Duration,
) -> Vec<Vec<ChannelMessage>> {
    let mut sessions: Vec<Vec<ChannelMessage>> = Vec::new();
    for msg in chrono_msgs {
        match sessions.last_mut() {
            Some(current) if !gap_exceeded(msg, current.last().expect("non-empty"), gap) => {
                current.push(msg.clone());
            }
            _ => sessions.push(vec![msg.clone()]),
        }
    }
    sessions
}

/// The session whose first (oldest) message id matches `record_id`.
pub fn find_session_by_record_id<'a>(
    sessions: &'a [Vec<ChannelMessage>],
    record_id: &str,
) -> Option<&'a [ChannelMessage]> {
    sessions
        .iter()
        .find(|s| s.first().map(|m| m.id.as_str()) == Some(record_id))
        .map(|s| s.as_slice())
}

/// Fetches and segments history for one channel.
pub struct HistoryFetcher {
    source: Box<dyn HistorySource>,
    page_size: usize,
    max_pages: usize,
    session_gap: Duration,
    max_session_messages: usize,
}

impl HistoryFetcher {
    pub fn new(source: Box<dyn HistorySource>) -> Self {
        Self {
            source,
            page_size: FETCH_PAGE_SIZE,
            max_pages: MAX_FETCH_PAGES,
            session_gap: Duration::from_std(SESSION_GAP).expect("constant fits"),
            max_session_messages: MAX_SESSION_MESSAGES,
        }
    }

    pub fn session_gap(&self) -> Duration {
        self.session_gap
    }

    /// The current session of a channel: `(messages chronological, record
    /// id, start time)`.
    pub async fn fetch_session_messages(
        &self,
        channel_id: &str,
    ) -> Result<(Vec<ChannelMessage>, String, DateTime<Utc>)> {
        let mut desc: Vec<ChannelMessage> = Vec::new();
        let mut before = String::new();

        for _ in 0..self.max_pages {
            let page = self.source.page(channel_id, self.page_size, &before).await?;
            if page.is_empty() {
                break;
            }
            before = page.last().expect("non-empty page").id.clone();
            desc.extend(page);

            let (count, boundary) = current_session_count_in_desc(
                &desc,
                self.session_gap,
                self.max_session_messages,
            );
            if count >= self.max_session_messages || boundary {
                desc.truncate(count);
                break;
            }
        }

        if desc.is_empty() {
            return Err(Error::NotFound(format!("no messages in channel={channel_id}")));
        }

        desc.reverse();
        if desc.len() > self.max_session_messages {
            let excess = desc.len() - self.max_session_messages;
            desc.drain(..excess);
        }

        let record_id = desc[0].id.clone();
        let start_at = desc[0].created_at.unwrap_or_else(Utc::now);
        Ok((desc, record_id, start_at))
    }

    /// Walk back through history until the session starting at `record_id`
    /// appears. Not-in-the-last-N-pages is an error; a found-but-empty
    /// record is not.
    pub async fn record_search(
        &self,
        channel_id: &str,
        record_id: &str,
    ) -> Result<Vec<ChannelMessage>> {
        let record_id = record_id.trim();
        if record_id.is_empty() {
            return Err(Error::Config("record_id is required".into()));
        }

        let mut desc: Vec<ChannelMessage> = Vec::new();
        let mut before = String::new();

        for _ in 0..self.max_pages {
            let page = self.source.page(channel_id, self.page_size, &before).await?;
            if page.is_empty() {
                break;
            }
            before = page.last().expect("non-empty page").id.clone();
            desc.extend(page);

            let mut chrono_msgs = desc.clone();
            chrono_msgs.reverse();
            let sessions = split_sessions_chronological(&chrono_msgs, self.session_gap);
            if let Some(found) = find_session_by_record_id(&sessions, record_id) {
                return Ok(found.to_vec());
            }
        }
        Err(Error::NotFound(format!("record not found (record_id={record_id})")))
    }

    /// The record id of the session containing `message_id`.
    pub async fn record_id_for_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<String> {
        let message_id = message_id.trim();
        if message_id.is_empty() {
            return Err(Error::Config("message_id is required".into()));
        }

        let mut desc: Vec<ChannelMessage> = Vec::new();
        let mut before = String::new();

        for _ in 0..self.max_pages {
            let page = self.source.page(channel_id, self.page_size, &before).await?;
            if page.is_empty() {
                break;
            }
            before = page.last().expect("non-empty page").id.clone();
            desc.extend(page);

            let mut chrono_msgs = desc.clone();
            chrono_msgs.reverse();
            let sessions = split_sessions_chronological(&chrono_msgs, self.session_gap);
            for session in &sessions {
                if session.iter().any(|m| m.id == message_id) {
                    return Ok(session[0].id.clone());
                }
            }
        }
        Err(Error::NotFound(format!("message not found (message_id={message_id})")))
    }

    /// Server-side keyword search. An empty keyword is an empty result, not
    /// an error.
    pub async fn search_history(
        &self,
        channel_id: &str,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<ChannelMessage>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        self.source.search(channel_id, keyword, limit.max(1), 1).await
    }

    /// "Active N days in the last 7" summary of the user's recent presence
    /// in the channel, computed in the presentation timezone.
    pub async fn user_activity_frequency(
        &self,
        channel_id: &str,
        user_id: &str,
        as_of: DateTime<Utc>,
        tz: chrono::FixedOffset,
    ) -> Result<String> {
        let local_as_of = as_of.with_timezone(&tz);
        let start_of_today = local_as_of
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight exists")
            .and_local_timezone(tz)
            .single()
            .unwrap_or(local_as_of);
        let window_start = start_of_today - Duration::days(ACTIVITY_WINDOW_DAYS - 1);

        let mut active_days = std::collections::HashSet::new();
        let mut before = String::new();

        for _ in 0..self.max_pages {
            let page = self.source.page(channel_id, self.page_size, &before).await?;
            if page.is_empty() {
                break;
            }
            before = page.last().expect("non-empty page").id.clone();

            let mut oldest: Option<DateTime<Utc>> = None;
            for msg in &page {
                if let Some(ts) = msg.created_at {
                    oldest = Some(oldest.map_or(ts, |o| o.min(ts)));
                }
                if msg.author_id().trim() != user_id.trim() {
                    continue;
                }
                let Some(ts) = msg.created_at else { continue };
                let local = ts.with_timezone(&tz);
                if local < window_start || local > local_as_of {
                    continue;
                }
                active_days.insert(local.date_naive());
            }

            if let Some(oldest) = oldest {
                if oldest.with_timezone(&tz) < window_start {
                    break;
                }
            }
        }

        let n = active_days.len();
        let day_word = if n == 1 { "day" } else { "days" };
        Ok(format!("Active {n} {day_word} in the last {ACTIVITY_WINDOW_DAYS}"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use mew_domain::types::AuthorRef;
    use parking_lot::Mutex;

    pub(crate) fn msg(id: &str, secs: i64, author: &str) -> ChannelMessage {
        ChannelMessage {
            id: id.into(),
            channel_id: "C1".into(),
            content: format!("msg {id}"),
            attachments: vec![],
            created_at: Some(DateTime::from_timestamp(secs, 0).unwrap()),
            author: Some(AuthorRef::Id(author.into())),
            retracted_at: None,
            kind: String::new(),
        }
    }

    /// Canned descending history, served in pages like the server would.
    pub(crate) struct CannedHistory {
        desc: Vec<ChannelMessage>,
        pub calls: Mutex<usize>,
    }

    impl CannedHistory {
        pub fn new(mut chrono_msgs: Vec<ChannelMessage>) -> Self {
            chrono_msgs.reverse();
            Self { desc: chrono_msgs, calls: Mutex::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl HistorySource for CannedHistory {
        async fn page(
            &self,
            _channel_id: &str,
            limit: usize,
            before: &str,
        ) -> Result<Vec<ChannelMessage>> {
            *self.calls.lock() += 1;
            let start = if before.is_empty() {
                0
            } else {
                match self.desc.iter().position(|m| m.id == before) {
                    Some(idx) => idx + 1,
                    None => return Ok(Vec::new()),
                }
            };
            Ok(self.desc.iter().skip(start).take(limit).cloned().collect())
        }

        async fn search(
            &self,
            _channel_id: &str,
            query: &str,
            limit: usize,
            _page: usize,
        ) -> Result<Vec<ChannelMessage>> {
            Ok(self
                .desc
                .iter()
                .filter(|m| m.content.contains(query))
                .take(limit)
                .cloned()
                .collect())
        }
    }

    const GAP: i64 = 600;

    #[test]
    fn desc_count_stops_at_boundary() {
        // Descending: M3 (t=2000), M2 (t=1900), M1 (t=100). Gap between M2
        // and M1 exceeds 10 minutes.
        let desc = vec![msg("M3", 2000, "U1"), msg("M2", 1900, "U1"), msg("M1", 100, "U1")];
        let (count, boundary) =
            current_session_count_in_desc(&desc, Duration::seconds(GAP), 40);
        assert_eq!(count, 2);
        assert!(boundary);
    }

    #[test]
    fn desc_count_caps_at_max() {
        let desc: Vec<ChannelMessage> =
            (0..10).map(|i| msg(&format!("M{i}"), 1000 - i, "U1")).collect();
        let (count, boundary) = current_session_count_in_desc(&desc, Duration::seconds(GAP), 4);
        assert_eq!(count, 4);
        assert!(!boundary);
    }

    #[test]
    fn chronological_split_respects_gap() {
        let chrono_msgs = vec![
            msg("M1", 0, "U1"),
            msg("M2", 100, "U1"),
            msg("M3", 100 + GAP + 1, "U1"),
            msg("M4", 100 + GAP + 50, "U1"),
        ];
        let sessions = split_sessions_chronological(&chrono_msgs, Duration::seconds(GAP));
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0][0].id, "M1");
        assert_eq!(sessions[1][0].id, "M3");

        assert!(find_session_by_record_id(&sessions, "M3").is_some());
        assert!(find_session_by_record_id(&sessions, "M2").is_none());
    }

    #[test]
    fn no_two_consecutive_messages_exceed_gap_within_session() {
        let chrono_msgs: Vec<ChannelMessage> = (0..20)
            .map(|i| msg(&format!("M{i}"), i * (GAP / 2), "U1"))
            .collect();
        let sessions = split_sessions_chronological(&chrono_msgs, Duration::seconds(GAP));
        for session in &sessions {
            for pair in session.windows(2) {
                let delta = pair[1]
                    .created_at
                    .unwrap()
                    .signed_duration_since(pair[0].created_at.unwrap());
                assert!(delta <= Duration::seconds(GAP));
            }
        }
    }

    #[tokio::test]
    async fn fetch_session_finds_current_record() {
        // Old session (M1, M2), then a gap, then the current one (M3, M4).
        let source = CannedHistory::new(vec![
            msg("M1", 0, "U1"),
            msg("M2", 50, "U1"),
            msg("M3", 50 + GAP + 100, "U1"),
            msg("M4", 50 + GAP + 200, "U1"),
        ]);
        let fetcher = HistoryFetcher::new(Box::new(source));
        let (msgs, record_id, start_at) = fetcher.fetch_session_messages("C1").await.unwrap();
        let ids: Vec<&str> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["M3", "M4"]);
        assert_eq!(record_id, "M3");
        assert_eq!(start_at.timestamp(), 50 + GAP + 100);
    }

    #[tokio::test]
    async fn fetch_session_empty_channel_is_not_found() {
        let fetcher = HistoryFetcher::new(Box::new(CannedHistory::new(vec![])));
        assert!(matches!(
            fetcher.fetch_session_messages("C1").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn record_search_walks_back_to_older_sessions() {
        let source = CannedHistory::new(vec![
            msg("M1", 0, "U1"),
            msg("M2", 50, "U1"),
            msg("M3", 50 + GAP + 100, "U1"),
        ]);
        let fetcher = HistoryFetcher::new(Box::new(source));
        let found = fetcher.record_search("C1", "M1").await.unwrap();
        let ids: Vec<&str> = found.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["M1", "M2"]);

        assert!(matches!(
            fetcher.record_search("C1", "M2").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn record_id_for_message_resolves_session_head() {
        let source = CannedHistory::new(vec![
            msg("M1", 0, "U1"),
            msg("M2", 50, "U1"),
            msg("M3", 50 + GAP + 100, "U1"),
        ]);
        let fetcher = HistoryFetcher::new(Box::new(source));
        assert_eq!(fetcher.record_id_for_message("C1", "M2").await.unwrap(), "M1");
        assert_eq!(fetcher.record_id_for_message("C1", "M3").await.unwrap(), "M3");
    }

    #[tokio::test]
    async fn empty_keyword_search_is_empty_not_error() {
        let fetcher = HistoryFetcher::new(Box::new(CannedHistory::new(vec![])));
        assert!(fetcher.search_history("C1", "  ", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activity_frequency_counts_distinct_days() {
        let day = 86_400;
        let now = 10 * day;
        let source = CannedHistory::new(vec![
            msg("M1", now - 2 * day, "U1"),
            msg("M2", now - 2 * day + 60, "U1"),
            msg("M3", now - day, "U2"),
            msg("M4", now - 600, "U1"),
        ]);
        let fetcher = HistoryFetcher::new(Box::new(source));
        let out = fetcher
            .user_activity_frequency(
                "C1",
                "U1",
                DateTime::from_timestamp(now, 0).unwrap(),
                chrono::FixedOffset::east_opt(0).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(out, "Active 2 days in the last 7");
    }
}
