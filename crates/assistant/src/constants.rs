//! Assistant tunables.

use std::time::Duration;

pub const EVENT_MESSAGE_CREATE: &str = "MESSAGE_CREATE";
pub const UPSTREAM_MESSAGE_CREATE: &str = "message/create";

pub const SILENCE_TOKEN: &str = "<SILENCE>";
pub const WANT_MORE_TOKEN: &str = "<WANT_MORE>";
/// Single-line control directive: `<PROACTIVE>{"delay_seconds":180,"reason":"..."}`
pub const PROACTIVE_TOKEN_PREFIX: &str = "<PROACTIVE>";
/// First-line tool request: `TOOL_CALL: {"tool":"HistorySearch","args":{...}}`
pub const TOOL_CALL_PREFIX: &str = "TOOL_CALL:";

pub const TOOL_HISTORY_SEARCH: &str = "HistorySearch";
pub const TOOL_RECORD_SEARCH: &str = "RecordSearch";

pub const SESSION_GAP: Duration = Duration::from_secs(10 * 60);
pub const MAX_SESSION_MESSAGES: usize = 40;
pub const FETCH_PAGE_SIZE: usize = 100;
pub const MAX_FETCH_PAGES: usize = 20;

pub const MAX_FACTS: usize = 30;
pub const MAX_SUMMARIES: usize = 30;
pub const MAX_REPLY_LINES: usize = 20;
pub const MAX_TOOL_CALLS: usize = 3;
pub const MAX_PROACTIVE_QUEUE: usize = 16;

pub const INGRESS_QUEUE_SIZE: usize = 128;
pub const WORKER_COUNT: usize = 4;

pub const PERIODIC_JOBS_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const PROACTIVE_TICK_INTERVAL: Duration = Duration::from_secs(10);

pub const DEFAULT_BASELINE_VALENCE: f64 = 0.2;
pub const DEFAULT_BASELINE_AROUSAL: f64 = 0.1;
pub const MOOD_DECAY_K_PER_HOUR: f64 = 0.25;

pub const REPLY_DELAY_BASE: Duration = Duration::from_millis(350);
pub const REPLY_DELAY_PER_RUNE: Duration = Duration::from_millis(60);
pub const REPLY_DELAY_MAX: Duration = Duration::from_millis(3500);

pub const PROACTIVE_MIN_DELAY: Duration = Duration::from_secs(30);
pub const PROACTIVE_MAX_DELAY: Duration = Duration::from_secs(24 * 3600);
pub const PROACTIVE_DEFAULT_DELAY: Duration = Duration::from_secs(3 * 60);
pub const PROACTIVE_MAX_ATTEMPTS: u32 = 3;
pub const PROACTIVE_RETRY_SPACING: Duration = Duration::from_secs(60);
pub const PROACTIVE_MAX_INTERMEDIATE_SUMMARIES: usize = 12;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_TOTAL_IMAGE_BYTES: usize = 12 * 1024 * 1024;
pub const DEFAULT_IMAGE_PROMPT: &str = "请识别图片中的内容，并结合上下文回复。";

pub const SESSION_START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
pub const DEFAULT_ACTIVITY: &str = "Active recently";
pub const TIME_SINCE_PREFIX: &str = "~";
pub const TIME_SINCE_UNKNOWN: &str = "unknown";

pub const HISTORY_SEARCH_LIMIT: usize = 10;
pub const ACTIVITY_WINDOW_DAYS: i64 = 7;

pub const LOG_CONTENT_PREVIEW: usize = 160;
pub const LOG_LLM_PREVIEW: usize = 240;
