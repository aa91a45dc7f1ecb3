//! The assistant bot worker.
//!
//! One runner per bot: authenticates the bot session, keeps a reconnecting
//! gateway connection feeding a bounded ingress queue, runs four message
//! workers with per-user serialization, a five-minute memory-distillation
//! tick, and the ten-second proactive tick.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mew_client::channels::post_message;
use mew_client::{BotSession, DmChannelCache};
use mew_domain::config::{websocket_url, RuntimeConfig};
use mew_domain::error::{Error, Result};
use mew_domain::types::{AttachmentRef, BootstrapBot, ChannelMessage};
use mew_domain::util::{humanize_duration, preview};
use mew_gateway::{
    run_gateway, EmitHandle, EventSink, GatewayEvent, GatewayOptions, MentionStripper, TokenSource,
};
use mew_llm::{ChatClient, RetryOptions};
use mew_sdk::store::StateStore;
use mew_sdk::supervisor::{Runner, RunnerFactory};
use mew_sdk::{run_interval, TaskGroup, UserLockMap};

use crate::chat::{chat_with_tools, RetryingTransport};
use crate::cognitive::{extract_facts_and_usage, summarize_record};
use crate::config::AssistantConfig;
use crate::constants::*;
use crate::controls::{is_silence, parse_reply_controls, ReplyControls};
use crate::memory::facts::{touch_facts_by_content, touch_facts_by_ids, upsert_facts};
use crate::memory::mood::compute_initial_mood;
use crate::memory::proactive::{append_request, build_proactive_request};
use crate::memory::summaries::append_summary;
use crate::memory::Metadata;
use crate::prompt::{
    build_l1l4_user_prompt, build_l5_messages_with_attachments, developer_instructions,
    format_session_record, load_persona, AttachmentFetcher,
};
use crate::reply::{send_reply_lines, LineSender};
use crate::session::{HistoryFetcher, MewHistorySource};
use crate::store::UserStateStore;
use crate::tools::ChannelTools;

/// Builds assistant runners for the supervisor.
pub struct AssistantRunnerFactory {
    runtime: RuntimeConfig,
    server_http: reqwest::Client,
    llm_http: reqwest::Client,
}

impl AssistantRunnerFactory {
    pub fn new(
        runtime: RuntimeConfig,
        server_http: reqwest::Client,
        llm_http: reqwest::Client,
    ) -> Self {
        Self { runtime, server_http, llm_http }
    }
}

impl RunnerFactory for AssistantRunnerFactory {
    fn create(&self, bot: &BootstrapBot) -> Result<Arc<dyn Runner>> {
        let runner = AssistantRunner::new(
            bot,
            &self.runtime,
            self.server_http.clone(),
            self.llm_http.clone(),
        )?;
        Ok(Arc::new(runner))
    }
}

struct SessionTokens(BotSession);

#[async_trait::async_trait]
impl TokenSource for SessionTokens {
    async fn token(&self) -> Result<String> {
        self.0.token().await
    }
}

/// Inbound work: one decoded message plus the emit handle of the
/// connection it arrived on.
struct Job {
    msg: ChannelMessage,
    emit: EmitHandle,
}

/// Gateway-side sink: decode and enqueue, never block the read loop.
struct IngressSink {
    tx: mpsc::Sender<Job>,
}

#[async_trait::async_trait]
impl EventSink for IngressSink {
    async fn on_event(&self, event: GatewayEvent, emit: EmitHandle) -> Result<()> {
        if event.name != EVENT_MESSAGE_CREATE {
            return Ok(());
        }
        let msg: ChannelMessage = match serde_json::from_value(event.payload) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable MESSAGE_CREATE payload");
                return Ok(());
            }
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(Job { msg, emit }) {
            tracing::warn!(
                queue_size = INGRESS_QUEUE_SIZE,
                "ingress queue full, dropping MESSAGE_CREATE"
            );
        }
        Ok(())
    }
}

/// Emit with HTTP fallback: a reply composed while the gateway reconnects
/// still reaches the channel.
struct GatewayLineSender {
    emit: EmitHandle,
    session: BotSession,
}

#[async_trait::async_trait]
impl LineSender for GatewayLineSender {
    async fn send_line(&self, channel_id: &str, line: &str) -> Result<()> {
        let payload = serde_json::json!({ "channelId": channel_id, "content": line });
        match self.emit.emit(UPSTREAM_MESSAGE_CREATE, &payload).await {
            Ok(()) => Ok(()),
            Err(gateway_err) => {
                tracing::warn!(error = %gateway_err, "gateway send failed, trying http fallback");
                post_message(&self.session, channel_id, line).await
            }
        }
    }
}

/// HTTP-only sender, used by the proactive scheduler.
pub(crate) struct HttpLineSender {
    pub session: BotSession,
}

#[async_trait::async_trait]
impl LineSender for HttpLineSender {
    async fn send_line(&self, channel_id: &str, line: &str) -> Result<()> {
        post_message(&self.session, channel_id, line).await
    }
}

struct SessionAttachments {
    session: BotSession,
}

#[async_trait::async_trait]
impl AttachmentFetcher for SessionAttachments {
    async fn download(
        &self,
        msg: &ChannelMessage,
        att: &AttachmentRef,
        limit: usize,
    ) -> Result<Vec<u8>> {
        mew_client::attachment::download_attachment(&self.session, &msg.channel_id, att, limit)
            .await
    }
}

pub(crate) struct RunnerInner {
    pub bot_id: String,
    pub bot_name: String,
    pub tz: FixedOffset,
    pub persona: String,
    instructions: String,
    remember_keywords: Vec<String>,
    ws_url: String,
    pub session: BotSession,
    pub llm: ChatClient,
    pub retry: RetryOptions,
    dm_channels: DmChannelCache,
    pub user_store: UserStateStore,
    pub fetcher: HistoryFetcher,
    pub user_locks: UserLockMap,
    known_users: RwLock<HashSet<String>>,
    bot_user_id: RwLock<String>,
    mention: RwLock<Option<MentionStripper>>,
}

pub struct AssistantRunner {
    inner: Arc<RunnerInner>,
}

impl AssistantRunner {
    pub fn new(
        bot: &BootstrapBot,
        runtime: &RuntimeConfig,
        server_http: reqwest::Client,
        llm_http: reqwest::Client,
    ) -> Result<Self> {
        let config = AssistantConfig::parse(&bot.config)?;
        let tz = config.utc_offset()?;
        let llm = ChatClient::new(config.llm_config(), llm_http)?;
        let ws_url = websocket_url(&runtime.mew_url)?;

        let persona_overrides = vec![
            std::path::PathBuf::from("prompt/system_prompt.txt"),
            std::path::PathBuf::from(&runtime.state_dir).join("prompt/system_prompt.txt"),
        ];
        let persona = load_persona(&persona_overrides, &config.user_interests);

        let session = BotSession::new(&runtime.api_base, &bot.access_token, server_http);
        let user_store = UserStateStore::new(
            StateStore::new(&runtime.state_dir, &runtime.service_type),
            &bot.id,
        );
        let fetcher = HistoryFetcher::new(Box::new(MewHistorySource::new(session.clone())));

        Ok(Self {
            inner: Arc::new(RunnerInner {
                bot_id: bot.id.clone(),
                bot_name: bot.name.clone(),
                remember_keywords: config.remember_keywords(),
                tz,
                persona,
                instructions: developer_instructions(),
                ws_url,
                session,
                llm,
                retry: RetryOptions::default(),
                dm_channels: DmChannelCache::new(),
                user_store,
                fetcher,
                user_locks: UserLockMap::new(),
                known_users: RwLock::new(HashSet::new()),
                bot_user_id: RwLock::new(String::new()),
                mention: RwLock::new(None),
            }),
        })
    }
}

#[async_trait::async_trait]
impl Runner for AssistantRunner {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let inner = self.inner.clone();

        let me = inner.session.user().await.map_err(|e| match e {
            Error::Auth(msg) => Error::Auth(format!("bot auth failed: {msg}")),
            other => other,
        })?;
        *inner.bot_user_id.write() = me.id.clone();
        *inner.mention.write() = Some(MentionStripper::new(&me.id));

        {
            let from_disk = inner.user_store.known_user_ids();
            let count = from_disk.len();
            inner.known_users.write().extend(from_disk);
            tracing::info!(
                bot_id = %inner.bot_id,
                name = %inner.bot_name,
                users = count,
                "known users loaded from disk"
            );
        }

        match inner.dm_channels.refresh(&inner.session).await {
            Ok(count) => tracing::info!(bot_id = %inner.bot_id, dm_channels = count, "dm cache primed"),
            Err(e) => tracing::warn!(bot_id = %inner.bot_id, error = %e, "dm refresh failed, will retry on demand"),
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>(INGRESS_QUEUE_SIZE);
        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));

        let mut group = TaskGroup::new(cancel.clone());

        for worker_id in 0..WORKER_COUNT {
            let inner = self.inner.clone();
            let jobs_rx = jobs_rx.clone();
            group.spawn(move |token| async move {
                loop {
                    let job = tokio::select! {
                        job = async { jobs_rx.lock().await.recv().await } => job,
                        _ = token.cancelled() => return,
                    };
                    let Some(job) = job else { return };
                    if let Err(e) = inner.handle_message_create(&token, job).await {
                        tracing::warn!(
                            bot_id = %inner.bot_id,
                            worker = worker_id,
                            error = %e,
                            "message handler error"
                        );
                    }
                }
            });
        }

        {
            let inner = self.inner.clone();
            group.spawn(move |token| async move {
                run_interval(&token.clone(), PERIODIC_JOBS_INTERVAL, true, |tick_token| {
                    let inner = inner.clone();
                    async move {
                        inner.run_periodic_fact_engine(&tick_token).await;
                        inner.finalize_stale_sessions(&tick_token).await;
                    }
                })
                .await;
            });
        }

        {
            let inner = self.inner.clone();
            group.spawn(move |token| async move {
                run_interval(&token.clone(), PROACTIVE_TICK_INTERVAL, true, |tick_token| {
                    let inner = inner.clone();
                    async move {
                        crate::proactive_runner::run_proactive_tick(&inner, &tick_token).await;
                    }
                })
                .await;
            });
        }

        {
            let inner = self.inner.clone();
            group.spawn(move |token| async move {
                let tokens = SessionTokens(inner.session.clone());
                let sink: Arc<dyn EventSink> = Arc::new(IngressSink { tx: jobs_tx });
                let result = run_gateway(
                    &token,
                    &inner.ws_url,
                    &tokens,
                    sink,
                    &GatewayOptions::default(),
                )
                .await;
                if let Err(e) = result {
                    if !matches!(e, Error::Cancelled) {
                        tracing::warn!(bot_id = %inner.bot_id, error = %e, "gateway stopped");
                    }
                }
            });
        }

        group.wait().await;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl RunnerInner {
    fn is_own_author(&self, msg: &ChannelMessage) -> bool {
        let own = self.bot_user_id.read();
        !own.is_empty() && msg.author_id().trim() == own.as_str()
    }

    fn strip_mention(&self, content: &str) -> (String, bool) {
        match &*self.mention.read() {
            Some(stripper) => stripper.strip(content),
            None => (content.trim().to_owned(), false),
        }
    }

    pub(crate) fn known_users_snapshot(&self) -> Vec<String> {
        let mut users: Vec<String> = self.known_users.read().iter().cloned().collect();
        users.sort();
        users
    }

    async fn handle_message_create(&self, cancel: &CancellationToken, job: Job) -> Result<()> {
        let mut msg = job.msg;
        if msg.channel_id.trim().is_empty() || msg.id.trim().is_empty() {
            return Ok(());
        }
        if self.is_own_author(&msg) {
            return Ok(());
        }

        let (rest, mentioned) = self.strip_mention(msg.content.trim());

        let mut is_dm = self.dm_channels.has(&msg.channel_id);
        if !is_dm && !mentioned {
            // Possibly a newly created DM; refresh once before giving up.
            if self.dm_channels.refresh(&self.session).await.is_err() {
                return Ok(());
            }
            is_dm = self.dm_channels.has(&msg.channel_id);
            if !is_dm {
                return Ok(());
            }
        }
        if !is_dm && !mentioned {
            return Ok(());
        }
        if mentioned {
            msg.content = rest;
        }

        let user_id = msg.author_id().trim().to_owned();
        if user_id.is_empty() {
            return Ok(());
        }

        tracing::info!(
            bot_id = %self.bot_id,
            mode = if is_dm { "DM" } else { "CHANNEL" },
            channel_id = %msg.channel_id,
            message_id = %msg.id,
            user_id = %user_id,
            content = %preview(&msg.content, LOG_CONTENT_PREVIEW),
            "MESSAGE_CREATE"
        );

        self.known_users.write().insert(user_id.clone());

        let _permit = self.user_locks.acquire(&user_id).await;
        self.process_message(cancel, msg, job.emit).await
    }

    async fn process_message(
        &self,
        cancel: &CancellationToken,
        msg: ChannelMessage,
        emit: EmitHandle,
    ) -> Result<()> {
        let user_id = msg.author_id().trim().to_owned();
        let channel_id = msg.channel_id.clone();
        let now = msg.created_at.unwrap_or_else(Utc::now);

        let mut facts = self.user_store.load_facts(&user_id)?;
        let summaries = self.user_store.load_summaries(&user_id)?;
        let mut meta = self.user_store.load_metadata(&user_id)?;

        // A fact mentioned verbatim in the inbound message is promoted to
        // MRU so LRU eviction keeps what the user still talks about.
        if touch_facts_by_content(&mut facts.facts, &msg.content, now) > 0 {
            self.user_store.save_facts(&user_id, &facts)?;
        }

        let (delta, prev_record_id, new_session) = apply_timing(&mut meta, &channel_id, now);
        if new_session {
            self.try_finalize_previous(cancel, &user_id, &mut meta).await;
        }

        let (session_msgs, record_id, start_at) =
            self.fetcher.fetch_session_messages(&channel_id).await?;
        tracing::debug!(
            channel_id = %channel_id,
            record_id = %record_id,
            start_at = %start_at.to_rfc3339(),
            messages = session_msgs.len(),
            "session record loaded"
        );

        self.update_session_state(&mut meta, &channel_id, &user_id, now, start_at, &record_id, &prev_record_id, delta)
            .await;
        self.user_store.save_metadata(&user_id, &meta)?;

        let l1l4 = build_l1l4_user_prompt(&self.instructions, &meta, &facts, &summaries);
        let attachments = SessionAttachments { session: self.session.clone() };
        let bot_user_id = self.bot_user_id.read().clone();
        let l5 =
            build_l5_messages_with_attachments(&session_msgs, &bot_user_id, self.tz, &attachments)
                .await;

        let sender = GatewayLineSender { emit, session: self.session.clone() };
        let (clean, controls) = self
            .reply_round(cancel, &sender, &channel_id, &user_id, &l1l4, l5.clone(), &mut meta, &record_id, now)
            .await?;

        // The model may ask to continue once without a user turn.
        if controls.want_more {
            let mut l5_more = l5;
            if !clean.trim().is_empty() {
                l5_more.push(mew_llm::ChatMessage::assistant(clean.trim()));
            }
            l5_more.push(mew_llm::ChatMessage::user("(you want to say more)"));
            let _ = self
                .reply_round(cancel, &sender, &channel_id, &user_id, &l1l4, l5_more, &mut meta, &record_id, now)
                .await?;
        }

        self.maybe_on_demand_remember(cancel, &msg.content, &session_msgs, &mut facts, &user_id, &channel_id, now)
            .await;
        Ok(())
    }

    /// One LLM round plus delivery: returns the cleaned reply and parsed
    /// controls so the caller can chain the want-more continuation.
    #[allow(clippy::too_many_arguments)]
    async fn reply_round(
        &self,
        cancel: &CancellationToken,
        sender: &dyn LineSender,
        channel_id: &str,
        user_id: &str,
        l1l4: &str,
        l5: Vec<mew_llm::ChatMessage>,
        meta: &mut Metadata,
        record_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(String, ReplyControls)> {
        let transport = RetryingTransport { client: &self.llm, retry: &self.retry };
        let tools = ChannelTools { fetcher: &self.fetcher, channel_id: channel_id.to_owned() };

        let (reply, mood) =
            chat_with_tools(cancel, &transport, &self.persona, l1l4, l5, &tools, channel_id)
                .await?;

        if let Some(mood) = mood {
            meta.final_mood = mood;
            self.user_store.save_metadata(user_id, meta)?;
        }

        let (clean, controls) = parse_reply_controls(&reply);
        if is_silence(&clean) {
            tracing::info!(channel_id, user_id, "reply suppressed");
        } else {
            let sent = send_reply_lines(cancel, sender, channel_id, &clean).await?;
            tracing::info!(channel_id, user_id, lines = sent, "reply sent");
        }

        if let Some(directive) = &controls.proactive {
            self.enqueue_proactive(user_id, channel_id, record_id, now, directive);
        }
        Ok((clean, controls))
    }

    fn enqueue_proactive(
        &self,
        user_id: &str,
        channel_id: &str,
        record_id: &str,
        now: DateTime<Utc>,
        directive: &crate::controls::ProactiveDirective,
    ) {
        let Some(req) = build_proactive_request(now, channel_id, record_id, directive) else {
            return;
        };
        let queue = match self.user_store.load_proactive(user_id) {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "proactive queue load failed");
                return;
            }
        };
        tracing::info!(
            channel_id,
            record_id,
            request_at = %req.request_at.to_rfc3339(),
            reason = %preview(&req.reason, LOG_CONTENT_PREVIEW),
            "proactive queued"
        );
        let queue = append_request(queue, req);
        if let Err(e) = self.user_store.save_proactive(user_id, &queue) {
            tracing::warn!(user_id, error = %e, "proactive queue save failed");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_session_state(
        &self,
        meta: &mut Metadata,
        channel_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
        start_at: DateTime<Utc>,
        record_id: &str,
        prev_record_id: &str,
        delta: chrono::Duration,
    ) {
        let record_changed = prev_record_id.trim() != record_id.trim();

        meta.record_id = record_id.to_owned();
        meta.start_at = Some(start_at);
        meta.last_message_at = Some(now);
        meta.channel_id = channel_id.to_owned();
        meta.session_start_datetime =
            start_at.with_timezone(&self.tz).format(SESSION_START_TIME_FORMAT).to_string();
        if record_changed {
            meta.last_fact_record_id = String::new();
            meta.last_fact_processed_at = None;
        }

        if meta.user_activity_frequency.trim().is_empty() || record_changed {
            match self.fetcher.user_activity_frequency(channel_id, user_id, now, self.tz).await {
                Ok(freq) if !freq.trim().is_empty() => meta.user_activity_frequency = freq,
                _ => {
                    if meta.user_activity_frequency.trim().is_empty() {
                        meta.user_activity_frequency = DEFAULT_ACTIVITY.to_owned();
                    }
                }
            }
        }

        meta.initial_mood =
            compute_initial_mood(meta.baseline_mood, meta.effective_final_mood(), delta);
    }

    async fn try_finalize_previous(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        meta: &mut Metadata,
    ) {
        if meta.record_id.is_empty()
            || meta.channel_id.is_empty()
            || meta.last_summarized_record_id == meta.record_id
        {
            return;
        }
        tracing::info!(
            user_id,
            record_id = %meta.record_id,
            last_summarized = %meta.last_summarized_record_id,
            "session rollover detected"
        );
        if let Err(e) = self.finalize_record(cancel, user_id, meta).await {
            tracing::warn!(user_id, error = %e, "finalize previous record failed, will retry later");
        }
    }

    /// Close a session: summarize it, extract facts, mark it summarized.
    pub(crate) async fn finalize_record(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        meta: &mut Metadata,
    ) -> Result<()> {
        let now = Utc::now();
        let mut facts = self.user_store.load_facts(user_id)?;
        let summaries = self.user_store.load_summaries(user_id)?;

        let msgs = self.fetcher.record_search(&meta.channel_id, &meta.record_id).await?;
        let record_text = format_session_record(&msgs);

        match summarize_record(cancel, &self.llm, &self.retry, &record_text).await {
            Ok(summary_text) if !summary_text.trim().is_empty() => {
                let summaries =
                    append_summary(now, summaries, &meta.record_id, &summary_text, MAX_SUMMARIES);
                self.user_store.save_summaries(user_id, &summaries)?;
                meta.last_summarized_record_id = meta.record_id.clone();
                self.user_store.save_metadata(user_id, meta)?;
                tracing::info!(
                    user_id,
                    record_id = %meta.record_id,
                    summaries = summaries.summaries.len(),
                    preview = %preview(&summary_text, LOG_CONTENT_PREVIEW),
                    "summary saved"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id, record_id = %meta.record_id, error = %e, "summarize failed");
            }
        }

        match extract_facts_and_usage(cancel, &self.llm, &self.retry, &record_text, &facts).await {
            Ok(result) if !result.is_empty() => {
                touch_facts_by_ids(&mut facts.facts, &result.used_fact_ids, now);
                let facts = upsert_facts(now, facts, &result.facts, MAX_FACTS);
                self.user_store.save_facts(user_id, &facts)?;
                tracing::info!(
                    user_id,
                    count = facts.facts.len(),
                    used = result.used_fact_ids.len(),
                    new = result.facts.len(),
                    "facts updated (end of session)"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(user_id, error = %e, "fact engine end-of-session failed");
            }
        }

        tracing::info!(user_id, record_id = %meta.record_id, "record finalized");
        Ok(())
    }

    fn should_on_demand_remember(&self, content: &str) -> bool {
        let lowered = content.trim().to_lowercase();
        if lowered.is_empty() {
            return false;
        }
        self.remember_keywords.iter().any(|k| lowered.contains(k))
    }

    #[allow(clippy::too_many_arguments)]
    async fn maybe_on_demand_remember(
        &self,
        cancel: &CancellationToken,
        user_content: &str,
        session_msgs: &[ChannelMessage],
        facts: &mut crate::memory::FactsFile,
        user_id: &str,
        channel_id: &str,
        now: DateTime<Utc>,
    ) {
        if !self.should_on_demand_remember(user_content) {
            return;
        }
        tracing::info!(channel_id, user_id, "fact engine on-demand");

        let session_text = format_session_record(session_msgs);
        match extract_facts_and_usage(cancel, &self.llm, &self.retry, &session_text, facts).await {
            Ok(result) if !result.is_empty() => {
                touch_facts_by_ids(&mut facts.facts, &result.used_fact_ids, now);
                let updated = upsert_facts(now, facts.clone(), &result.facts, MAX_FACTS);
                if let Err(e) = self.user_store.save_facts(user_id, &updated) {
                    tracing::warn!(user_id, error = %e, "fact save failed");
                    return;
                }
                *facts = updated;
                tracing::info!(user_id, count = facts.facts.len(), "facts updated (on-demand)");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(user_id, error = %e, "fact engine on-demand failed"),
        }
    }

    /// Five-minute tick, part one: distill facts for users with an active
    /// session that has new activity since the last pass.
    async fn run_periodic_fact_engine(&self, cancel: &CancellationToken) {
        let now = Utc::now();
        let gap = self.fetcher.session_gap();

        for user_id in self.known_users_snapshot() {
            if cancel.is_cancelled() {
                return;
            }
            let _permit = self.user_locks.acquire(&user_id).await;

            let mut meta = match self.user_store.load_metadata(&user_id) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "load metadata failed (periodic)");
                    continue;
                }
            };
            if meta.record_id.is_empty() || meta.channel_id.is_empty() {
                continue;
            }
            let Some(last_message_at) = meta.last_message_at else { continue };
            if now.signed_duration_since(last_message_at) > gap {
                continue;
            }
            let already_processed = meta.last_fact_record_id.trim() == meta.record_id.trim()
                && meta
                    .last_fact_processed_at
                    .map(|t| last_message_at <= t)
                    .unwrap_or(false);
            if already_processed {
                continue;
            }

            let mut facts = match self.user_store.load_facts(&user_id) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "load facts failed (periodic)");
                    continue;
                }
            };

            let (session_msgs, record_id, _) =
                match self.fetcher.fetch_session_messages(&meta.channel_id).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, channel_id = %meta.channel_id, error = %e, "session load failed (periodic)");
                        continue;
                    }
                };
            if record_id.trim() != meta.record_id.trim() {
                continue;
            }

            let session_text = format_session_record(&session_msgs);
            match extract_facts_and_usage(cancel, &self.llm, &self.retry, &session_text, &facts)
                .await
            {
                Ok(result) => {
                    if !result.is_empty() {
                        touch_facts_by_ids(&mut facts.facts, &result.used_fact_ids, now);
                        let facts = upsert_facts(now, facts, &result.facts, MAX_FACTS);
                        if let Err(e) = self.user_store.save_facts(&user_id, &facts) {
                            tracing::warn!(user_id = %user_id, error = %e, "fact save failed (periodic)");
                            continue;
                        }
                        tracing::info!(
                            user_id = %user_id,
                            record_id = %meta.record_id,
                            count = facts.facts.len(),
                            "facts updated (periodic)"
                        );
                    }
                    meta.last_fact_record_id = meta.record_id.clone();
                    meta.last_fact_processed_at = Some(last_message_at);
                    if let Err(e) = self.user_store.save_metadata(&user_id, &meta) {
                        tracing::warn!(user_id = %user_id, error = %e, "metadata save failed (periodic)");
                    }
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "fact engine periodic failed");
                }
            }
        }
    }

    /// Five-minute tick, part two: finalize sessions that went stale
    /// without a rollover message.
    async fn finalize_stale_sessions(&self, cancel: &CancellationToken) {
        let now = Utc::now();
        let gap = self.fetcher.session_gap();

        for user_id in self.known_users_snapshot() {
            if cancel.is_cancelled() {
                return;
            }
            let _permit = self.user_locks.acquire(&user_id).await;

            let mut meta = match self.user_store.load_metadata(&user_id) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "load metadata failed (stale sweep)");
                    continue;
                }
            };
            if meta.record_id.is_empty() || meta.channel_id.is_empty() {
                continue;
            }
            let Some(last_message_at) = meta.last_message_at else { continue };
            if now.signed_duration_since(last_message_at) <= gap {
                continue;
            }
            if meta.last_summarized_record_id == meta.record_id {
                continue;
            }

            if let Err(e) = self.finalize_record(cancel, &user_id, &mut meta).await {
                tracing::warn!(user_id = %user_id, error = %e, "stale session finalize failed");
            }
        }
    }
}

/// Update timing-derived metadata and detect a session rollover. Returns
/// `(time since last message, previous record id, new session?)`.
pub(crate) fn apply_timing(
    meta: &mut Metadata,
    channel_id: &str,
    now: DateTime<Utc>,
) -> (chrono::Duration, String, bool) {
    let prev_record_id = meta.record_id.clone();
    if meta.channel_id.is_empty() {
        meta.channel_id = channel_id.to_owned();
    }

    let gap = chrono::Duration::from_std(SESSION_GAP).expect("constant fits");
    let mut delta = chrono::Duration::zero();
    match meta.last_message_at {
        Some(last) => {
            delta = now.signed_duration_since(last).max(chrono::Duration::zero());
            let human = humanize_duration(delta.to_std().unwrap_or_default());
            meta.time_since_last_message = format!("{TIME_SINCE_PREFIX}{human}");
        }
        None => {
            meta.time_since_last_message = TIME_SINCE_UNKNOWN.to_owned();
        }
    }

    let new_session =
        meta.record_id.is_empty() || meta.last_message_at.is_none() || delta > gap;
    (delta, prev_record_id, new_session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn first_message_is_a_new_session() {
        let mut meta = Metadata::default().normalized();
        let (delta, prev, new_session) = apply_timing(&mut meta, "C1", ts(1000));
        assert!(new_session);
        assert!(prev.is_empty());
        assert_eq!(delta, chrono::Duration::zero());
        assert_eq!(meta.time_since_last_message, TIME_SINCE_UNKNOWN);
        assert_eq!(meta.channel_id, "C1");
    }

    #[test]
    fn within_gap_continues_session() {
        let mut meta = Metadata {
            record_id: "R1".into(),
            channel_id: "C1".into(),
            last_message_at: Some(ts(1000)),
            ..Default::default()
        }
        .normalized();
        let (delta, prev, new_session) = apply_timing(&mut meta, "C1", ts(1000 + 9 * 60));
        assert!(!new_session);
        assert_eq!(prev, "R1");
        assert_eq!(delta, chrono::Duration::minutes(9));
        assert_eq!(meta.time_since_last_message, "~9m");
    }

    #[test]
    fn past_gap_rolls_over() {
        let mut meta = Metadata {
            record_id: "R1".into(),
            channel_id: "C1".into(),
            last_message_at: Some(ts(1000)),
            ..Default::default()
        }
        .normalized();
        let (_, prev, new_session) = apply_timing(&mut meta, "C1", ts(1000 + 11 * 60));
        assert!(new_session);
        assert_eq!(prev, "R1");
    }

    #[test]
    fn clock_skew_clamps_delta() {
        let mut meta = Metadata {
            record_id: "R1".into(),
            last_message_at: Some(ts(2000)),
            ..Default::default()
        }
        .normalized();
        let (delta, _, new_session) = apply_timing(&mut meta, "C1", ts(1000));
        assert_eq!(delta, chrono::Duration::zero());
        assert!(!new_session);
    }
}
