//! Deferred self-initiated messages.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    MAX_PROACTIVE_QUEUE, PROACTIVE_DEFAULT_DELAY, PROACTIVE_MAX_DELAY, PROACTIVE_MIN_DELAY,
};
use crate::controls::ProactiveDirective;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveRequest {
    pub id: String,
    #[serde(rename = "addedAt")]
    pub added_at: DateTime<Utc>,
    #[serde(rename = "requestAt")]
    pub request_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "channelId")]
    pub channel_id: String,
    #[serde(rename = "recordId")]
    pub record_id: String,
    #[serde(default)]
    pub attempts: u32,
    #[serde(rename = "lastAttemptAt", default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProactiveQueueFile {
    #[serde(default)]
    pub requests: Vec<ProactiveRequest>,
}

/// Turn a parsed directive into a queued request. Delay clamps to
/// [30 s, 24 h] with a 3-minute default; missing channel/record context
/// drops the directive.
pub fn build_proactive_request(
    now: DateTime<Utc>,
    channel_id: &str,
    record_id: &str,
    directive: &ProactiveDirective,
) -> Option<ProactiveRequest> {
    let channel_id = channel_id.trim();
    let record_id = record_id.trim();
    if channel_id.is_empty() || record_id.is_empty() {
        return None;
    }

    let total_secs =
        directive.delay_seconds.max(0) as i64 + directive.delay_minutes.max(0) as i64 * 60;
    let delay = if total_secs <= 0 {
        Duration::from_std(PROACTIVE_DEFAULT_DELAY).expect("constant fits")
    } else {
        Duration::seconds(total_secs)
    };
    let min = Duration::from_std(PROACTIVE_MIN_DELAY).expect("constant fits");
    let max = Duration::from_std(PROACTIVE_MAX_DELAY).expect("constant fits");
    let delay = delay.clamp(min, max);

    Some(ProactiveRequest {
        id: uuid::Uuid::new_v4().to_string(),
        added_at: now,
        request_at: now + delay,
        reason: directive.reason.trim().to_owned(),
        channel_id: channel_id.to_owned(),
        record_id: record_id.to_owned(),
        attempts: 0,
        last_attempt_at: None,
    })
}

/// Append a request, trimming the oldest entries past the per-user cap.
pub fn append_request(mut queue: ProactiveQueueFile, req: ProactiveRequest) -> ProactiveQueueFile {
    queue.requests.push(req);
    if queue.requests.len() > MAX_PROACTIVE_QUEUE {
        let excess = queue.requests.len() - MAX_PROACTIVE_QUEUE;
        queue.requests.drain(..excess);
    }
    queue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn directive(secs: i32, mins: i32) -> ProactiveDirective {
        ProactiveDirective { delay_seconds: secs, delay_minutes: mins, reason: "check in".into() }
    }

    #[test]
    fn short_delay_clamps_to_minimum() {
        let req = build_proactive_request(ts(0), "C1", "R1", &directive(5, 0)).unwrap();
        assert_eq!(req.request_at, ts(30));
    }

    #[test]
    fn zero_delay_uses_default() {
        let req = build_proactive_request(ts(0), "C1", "R1", &directive(0, 0)).unwrap();
        assert_eq!(req.request_at, ts(180));
    }

    #[test]
    fn long_delay_clamps_to_day() {
        let req = build_proactive_request(ts(0), "C1", "R1", &directive(0, 60 * 48)).unwrap();
        assert_eq!(req.request_at, ts(24 * 3600));
    }

    #[test]
    fn minutes_and_seconds_combine() {
        let req = build_proactive_request(ts(0), "C1", "R1", &directive(30, 2)).unwrap();
        assert_eq!(req.request_at, ts(150));
    }

    #[test]
    fn missing_context_drops_directive() {
        assert!(build_proactive_request(ts(0), " ", "R1", &directive(60, 0)).is_none());
        assert!(build_proactive_request(ts(0), "C1", "", &directive(60, 0)).is_none());
    }

    #[test]
    fn queue_cap_drops_oldest() {
        let mut queue = ProactiveQueueFile::default();
        for i in 0..(MAX_PROACTIVE_QUEUE + 4) {
            let mut req =
                build_proactive_request(ts(i as i64), "C1", "R1", &directive(60, 0)).unwrap();
            req.reason = format!("r{i}");
            queue = append_request(queue, req);
        }
        assert_eq!(queue.requests.len(), MAX_PROACTIVE_QUEUE);
        assert_eq!(queue.requests[0].reason, "r4");
    }

    #[test]
    fn request_ids_are_unique() {
        let a = build_proactive_request(ts(0), "C1", "R1", &directive(60, 0)).unwrap();
        let b = build_proactive_request(ts(0), "C1", "R1", &directive(60, 0)).unwrap();
        assert_ne!(a.id, b.id);
    }
}
