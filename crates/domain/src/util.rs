//! Small text and time helpers shared by the plugin crates.

use std::time::Duration;

/// Truncate a string to `max_chars` characters for log previews, appending
/// an ellipsis when something was cut.
pub fn preview(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_owned();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{cut}…")
}

/// Render a duration the way a human would say it: "45s", "12m", "3h20m",
/// "2d4h".
pub fn humanize_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{secs}s");
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{mins}m");
    }
    let hours = mins / 60;
    let rem_mins = mins % 60;
    if hours < 24 {
        if rem_mins == 0 {
            return format!("{hours}h");
        }
        return format!("{hours}h{rem_mins}m");
    }
    let days = hours / 24;
    let rem_hours = hours % 24;
    if rem_hours == 0 {
        return format!("{days}d");
    }
    format!("{days}d{rem_hours}h")
}

/// Resolve a timezone string into a fixed UTC offset in seconds.
///
/// Accepts IANA names (via chrono-tz, offset taken as of now), fixed offsets
/// like `+08:00`, `-0700`, `UTC+8`, `GMT+08:00`, and a bare `UTC`/`GMT`.
/// Empty input resolves to the default `+08:00`.
pub fn resolve_utc_offset_secs(tz: &str) -> Result<i32, String> {
    let raw = tz.trim();
    if raw.is_empty() {
        return Ok(8 * 3600);
    }

    if let Some(offset) = parse_fixed_offset(raw) {
        return offset;
    }

    match raw.parse::<chrono_tz::Tz>() {
        Ok(zone) => {
            use chrono::Offset;
            let now = chrono::Utc::now().with_timezone(&zone);
            Ok(now.offset().fix().local_minus_utc())
        }
        Err(_) => Err(format!(
            "invalid timezone {raw:?} (try \"+08:00\" or \"Asia/Shanghai\")"
        )),
    }
}

fn parse_fixed_offset(raw: &str) -> Option<Result<i32, String>> {
    let mut s = raw;
    let upper = s.to_ascii_uppercase();
    if upper.starts_with("UTC") || upper.starts_with("GMT") {
        s = s[3..].trim();
        if s.is_empty() {
            return Some(Ok(0));
        }
    }

    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return None,
    };
    let rest = rest.trim();

    let (hours, mins) = if let Some((h, m)) = rest.split_once(':') {
        match (h.parse::<i32>(), m.parse::<i32>()) {
            (Ok(h), Ok(m)) => (h, m),
            _ => return Some(Err(format!("invalid timezone offset {raw:?}"))),
        }
    } else {
        match rest.len() {
            1 | 2 => match rest.parse::<i32>() {
                Ok(h) => (h, 0),
                Err(_) => return Some(Err(format!("invalid timezone offset {raw:?}"))),
            },
            3 | 4 => {
                let padded = if rest.len() == 3 { format!("0{rest}") } else { rest.to_owned() };
                match (padded[..2].parse::<i32>(), padded[2..].parse::<i32>()) {
                    (Ok(h), Ok(m)) => (h, m),
                    _ => return Some(Err(format!("invalid timezone offset {raw:?}"))),
                }
            }
            _ => return Some(Err(format!("invalid timezone offset {raw:?}"))),
        }
    };

    if !(0..=14).contains(&hours) || !(0..=59).contains(&mins) {
        return Some(Err(format!("invalid timezone offset {raw:?}")));
    }
    Some(Ok(sign * (hours * 3600 + mins * 60)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("hello", 10), "hello");
        assert_eq!(preview("hello world", 5), "hello…");
        assert_eq!(preview("你好世界啊", 2), "你好…");
    }

    #[test]
    fn humanize_durations() {
        assert_eq!(humanize_duration(Duration::from_secs(45)), "45s");
        assert_eq!(humanize_duration(Duration::from_secs(12 * 60)), "12m");
        assert_eq!(humanize_duration(Duration::from_secs(3 * 3600 + 20 * 60)), "3h20m");
        assert_eq!(humanize_duration(Duration::from_secs(2 * 86400 + 4 * 3600)), "2d4h");
        assert_eq!(humanize_duration(Duration::from_secs(86400)), "1d");
    }

    #[test]
    fn fixed_offsets_parse() {
        assert_eq!(resolve_utc_offset_secs("").unwrap(), 8 * 3600);
        assert_eq!(resolve_utc_offset_secs("+08:00").unwrap(), 8 * 3600);
        assert_eq!(resolve_utc_offset_secs("-0700").unwrap(), -7 * 3600);
        assert_eq!(resolve_utc_offset_secs("UTC+8").unwrap(), 8 * 3600);
        assert_eq!(resolve_utc_offset_secs("GMT+08:00").unwrap(), 8 * 3600);
        assert_eq!(resolve_utc_offset_secs("UTC").unwrap(), 0);
        assert!(resolve_utc_offset_secs("+25:00").is_err());
        assert!(resolve_utc_offset_secs("not-a-zone").is_err());
    }

    #[test]
    fn iana_zone_resolves() {
        // UTC never has DST surprises.
        assert_eq!(resolve_utc_offset_secs("UTC").unwrap(), 0);
        assert_eq!(resolve_utc_offset_secs("Asia/Shanghai").unwrap(), 8 * 3600);
    }
}
