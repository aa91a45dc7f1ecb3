//! Reply segmentation and human-paced delivery.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mew_domain::error::Result;

use crate::constants::{
    MAX_REPLY_LINES, REPLY_DELAY_BASE, REPLY_DELAY_MAX, REPLY_DELAY_PER_RUNE,
};

/// Delivers one reply line to a channel. The gateway sender falls back to
/// the HTTP message endpoint when the socket write fails; the proactive
/// sender is HTTP-only.
#[async_trait::async_trait]
pub trait LineSender: Send + Sync {
    async fn send_line(&self, channel_id: &str, line: &str) -> Result<()>;
}

/// Inter-line typing delay: base + per-character, capped.
pub fn reply_delay_for_line(line: &str) -> Duration {
    let n = line.trim().chars().count() as u32;
    if n == 0 {
        return Duration::ZERO;
    }
    let d = REPLY_DELAY_BASE + REPLY_DELAY_PER_RUNE * n;
    d.min(REPLY_DELAY_MAX)
}

/// Split a reply into trimmed non-empty lines, capped at the line budget.
pub fn split_reply_lines(reply: &str) -> Vec<String> {
    reply
        .replace("\r\n", "\n")
        .split('\n')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(MAX_REPLY_LINES)
        .map(str::to_owned)
        .collect()
}

/// Send a multi-line reply with pacing between lines. Returns the number of
/// lines delivered. Cancellation stops between lines, never mid-send.
pub async fn send_reply_lines(
    cancel: &CancellationToken,
    sender: &dyn LineSender,
    channel_id: &str,
    reply: &str,
) -> Result<usize> {
    let lines = split_reply_lines(reply);
    let mut sent = 0usize;

    for (i, line) in lines.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }
        sender.send_line(channel_id, line).await?;
        sent += 1;

        if i + 1 < lines.len() {
            let delay = reply_delay_for_line(line);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn delay_scales_with_length_and_caps() {
        assert_eq!(reply_delay_for_line("   "), Duration::ZERO);
        assert_eq!(reply_delay_for_line("ab"), Duration::from_millis(350 + 2 * 60));
        let long: String = "x".repeat(200);
        assert_eq!(reply_delay_for_line(&long), REPLY_DELAY_MAX);
    }

    #[test]
    fn split_drops_blank_lines_and_caps() {
        let lines = split_reply_lines("a\n\n  \nb\r\nc");
        assert_eq!(lines, vec!["a", "b", "c"]);

        let many: String = (0..25).map(|i| format!("line {i}\n")).collect();
        assert_eq!(split_reply_lines(&many).len(), MAX_REPLY_LINES);
    }

    struct Recorder {
        lines: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl LineSender for Recorder {
        async fn send_line(&self, _channel_id: &str, line: &str) -> Result<()> {
            self.lines.lock().push(line.to_owned());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_each_line_in_order() {
        let recorder = Recorder { lines: Mutex::new(Vec::new()) };
        let cancel = CancellationToken::new();
        let sent = send_reply_lines(&cancel, &recorder, "C1", "one\ntwo\nthree").await.unwrap();
        assert_eq!(sent, 3);
        assert_eq!(*recorder.lines.lock(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn twenty_five_lines_cap_at_twenty() {
        tokio::time::pause();
        let recorder = Recorder { lines: Mutex::new(Vec::new()) };
        let cancel = CancellationToken::new();
        let reply: String = (0..25).map(|i| format!("line {i}\n")).collect();
        let sent = send_reply_lines(&cancel, &recorder, "C1", &reply).await.unwrap();
        assert_eq!(sent, MAX_REPLY_LINES);
    }
}
