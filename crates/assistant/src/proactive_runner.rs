//! The proactive scheduler tick.
//!
//! Every ten seconds, for each known user under that user's lock: load the
//! queue, let due requests either send one LLM-composed message over HTTP
//! or stay silent, and keep failed ones for retry. A drifted record (the
//! user has moved to a newer session) still proceeds; the current session
//! record travels along as separate context and the model may choose
//! silence given the drift.

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use mew_domain::util::preview;
use mew_llm::ChatMessage;

use crate::constants::{
    LOG_CONTENT_PREVIEW, PROACTIVE_MAX_ATTEMPTS, PROACTIVE_MAX_INTERMEDIATE_SUMMARIES,
    PROACTIVE_RETRY_SPACING, SILENCE_TOKEN, WANT_MORE_TOKEN,
};
use crate::controls::parse_reply_controls;
use crate::memory::summaries::{format_summaries_for_context, summaries_between, SummariesFile};
use crate::memory::{ProactiveQueueFile, ProactiveRequest};
use crate::prompt::format_session_record;
use crate::reply::send_reply_lines;
use crate::runner::{HttpLineSender, RunnerInner};

pub(crate) async fn run_proactive_tick(inner: &RunnerInner, cancel: &CancellationToken) {
    for user_id in inner.known_users_snapshot() {
        if cancel.is_cancelled() {
            return;
        }
        let _permit = inner.user_locks.acquire(&user_id).await;
        if let Err(e) = run_queue_for_user(inner, cancel, &user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "proactive tick failed for user");
        }
    }
}

async fn run_queue_for_user(
    inner: &RunnerInner,
    cancel: &CancellationToken,
    user_id: &str,
) -> mew_domain::error::Result<()> {
    let queue = inner.user_store.load_proactive(user_id)?;
    if queue.requests.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    let has_due = queue.requests.iter().any(|r| r.request_at <= now);
    if !has_due {
        return Ok(());
    }

    let meta = inner.user_store.load_metadata(user_id)?;
    let summaries = inner.user_store.load_summaries(user_id)?;

    // Current-session context, shared across all due requests this tick.
    let mut current_record_id = String::new();
    let mut current_record_text = String::new();
    let mut current_session_start = None;
    if !meta.channel_id.trim().is_empty() {
        if let Ok((msgs, record_id, start_at)) =
            inner.fetcher.fetch_session_messages(&meta.channel_id).await
        {
            if !msgs.is_empty() {
                current_record_id = record_id;
                current_record_text = format_session_record(&msgs);
                current_session_start = Some(start_at);
            }
        }
    }

    let mut kept: Vec<ProactiveRequest> = Vec::with_capacity(queue.requests.len());
    for mut req in queue.requests {
        if cancel.is_cancelled() {
            kept.push(req);
            continue;
        }
        if req.request_at > now {
            kept.push(req);
            continue;
        }
        if req.attempts >= PROACTIVE_MAX_ATTEMPTS {
            tracing::info!(
                user_id,
                request_id = %req.id,
                attempts = req.attempts,
                "proactive dropped after max attempts"
            );
            continue;
        }
        if let Some(last) = req.last_attempt_at {
            let spacing = chrono::Duration::from_std(PROACTIVE_RETRY_SPACING).expect("constant fits");
            if now.signed_duration_since(last) < spacing {
                kept.push(req);
                continue;
            }
        }
        req.attempts += 1;
        req.last_attempt_at = Some(now);

        let record_msgs = match inner.fetcher.record_search(&req.channel_id, &req.record_id).await
        {
            Ok(msgs) => msgs,
            Err(e) => {
                tracing::warn!(
                    user_id,
                    channel_id = %req.channel_id,
                    record_id = %req.record_id,
                    error = %e,
                    "proactive record load failed"
                );
                kept.push(req);
                continue;
            }
        };
        let record_text = format_session_record(&record_msgs);

        let window_end = current_session_start.unwrap_or(now);
        let intermediate = intermediate_summaries_text(&summaries, &req, window_end);

        let prompt = compose_prompt(
            &req,
            &record_text,
            &current_record_id,
            &current_record_text,
            &intermediate,
            now,
        );
        let messages =
            vec![ChatMessage::system(inner.persona.trim()), ChatMessage::user(prompt)];

        let out = match inner.llm.chat_with_retry(cancel, &inner.retry, &messages).await {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(user_id, record_id = %req.record_id, error = %e, "proactive llm failed");
                kept.push(req);
                continue;
            }
        };

        let (clean, _) = parse_reply_controls(&out);
        let clean = clean.trim().to_owned();
        if clean.is_empty() || clean.contains(SILENCE_TOKEN) {
            tracing::info!(user_id, record_id = %req.record_id, "proactive silenced, dropping");
            continue;
        }

        let sender = HttpLineSender { session: inner.session.clone() };
        match send_reply_lines(cancel, &sender, &req.channel_id, &clean).await {
            Ok(_) => {
                tracing::info!(
                    channel_id = %req.channel_id,
                    record_id = %req.record_id,
                    reason = %preview(&req.reason, LOG_CONTENT_PREVIEW),
                    content = %preview(&clean, LOG_CONTENT_PREVIEW),
                    "proactive sent"
                );
            }
            Err(e) => {
                tracing::warn!(
                    user_id,
                    channel_id = %req.channel_id,
                    error = %e,
                    "proactive send failed, keeping for retry"
                );
                kept.push(req);
            }
        }
    }

    inner
        .user_store
        .save_proactive(user_id, &ProactiveQueueFile { requests: kept })
}

fn intermediate_summaries_text(
    summaries: &SummariesFile,
    req: &ProactiveRequest,
    window_end: chrono::DateTime<Utc>,
) -> String {
    let picked = summaries_between(
        summaries,
        Some(req.added_at),
        window_end,
        PROACTIVE_MAX_INTERMEDIATE_SUMMARIES,
    );
    if picked.is_empty() {
        return String::new();
    }
    format_summaries_for_context(&SummariesFile { summaries: picked })
}

fn compose_prompt(
    req: &ProactiveRequest,
    record_text: &str,
    current_record_id: &str,
    current_record_text: &str,
    intermediate: &str,
    now: chrono::DateTime<Utc>,
) -> String {
    let mut current_ids = String::new();
    if !req.channel_id.trim().is_empty() {
        current_ids.push_str(&format!("- current_channel_id: {}\n", req.channel_id.trim()));
    }
    if !current_record_id.trim().is_empty() {
        current_ids.push_str(&format!("- current_record_id: {}\n", current_record_id.trim()));
    }

    format!(
        "You may send ONE proactive message to the user, or decide to send nothing.\n\n\
         Rules:\n\
         - If you decide to send nothing, output exactly {SILENCE_TOKEN} and nothing else.\n\
         - If you decide to send, output only the message content (no {WANT_MORE_TOKEN} directives, no final_mood line).\n\
         - Avoid repeating what was already discussed; do not interrupt if the user already continued the topic.\n\
         ===\n\n\
         Scheduling context:\n\
         - now: {}\n\
         - added_at: {}\n\
         - request_at: {}\n\
         - reason: {}\n\
         - record_id: {}\n\n\
         Current conversation context (may differ from this scheduled request):\n{}\n\
         ===\n\n\
         Scheduled session record (when the request was created):\n{}\n\n\
         Session summaries between the scheduled request and now:\n{}\n\n\
         Recent current session record:\n{}",
        now.to_rfc3339(),
        req.added_at.to_rfc3339(),
        req.request_at.to_rfc3339(),
        req.reason.trim(),
        req.record_id.trim(),
        current_ids.trim_end(),
        record_text.trim(),
        intermediate.trim(),
        current_record_text.trim(),
    )
}
