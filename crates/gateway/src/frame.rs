//! Engine.IO / Socket.IO frame codec.

use mew_domain::error::{Error, Result};

/// Record separator between frames in one WebSocket message.
pub const FRAME_SEPARATOR: char = '\u{1e}';

/// One decoded Engine.IO / Socket.IO frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Engine.IO OPEN (`0...`); the session must answer with CONNECT.
    Open,
    /// Engine.IO CLOSE (`1`); the server is going away.
    Close,
    /// Engine.IO PING (`2`); must be answered with PONG within the interval.
    Ping,
    /// Engine.IO PONG (`3`).
    Pong,
    /// Socket.IO CONNECT ack (`40...`).
    ConnectAck,
    /// Socket.IO ERROR (`44...`), body kept for logs.
    SocketError(String),
    /// Socket.IO EVENT (`42[name, payload]`).
    Event { name: String, payload: serde_json::Value },
    /// Anything unrecognized; ignored by the client.
    Other(String),
}

/// Split one WebSocket text message into its frames.
pub fn split_frames(message: &str) -> impl Iterator<Item = &str> {
    message.split(FRAME_SEPARATOR).filter(|f| !f.is_empty())
}

/// Decode a single frame.
pub fn parse_frame(raw: &str) -> Result<Frame> {
    let mut chars = raw.chars();
    let Some(first) = chars.next() else {
        return Ok(Frame::Other(String::new()));
    };
    match first {
        '0' => Ok(Frame::Open),
        '1' => Ok(Frame::Close),
        '2' => Ok(Frame::Ping),
        '3' => Ok(Frame::Pong),
        '4' => match chars.next() {
            Some('0') => Ok(Frame::ConnectAck),
            Some('4') => Ok(Frame::SocketError(raw.trim().to_owned())),
            Some('2') => parse_event(&raw[2..]),
            _ => Ok(Frame::Other(raw.to_owned())),
        },
        _ => Ok(Frame::Other(raw.to_owned())),
    }
}

fn parse_event(body: &str) -> Result<Frame> {
    let arr: Vec<serde_json::Value> = serde_json::from_str(body)
        .map_err(|e| Error::Gateway(format!("malformed event frame: {e}")))?;
    let mut iter = arr.into_iter();
    let name = match iter.next() {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
        _ => return Ok(Frame::Other(format!("42{body}"))),
    };
    let payload = iter.next().unwrap_or(serde_json::Value::Null);
    Ok(Frame::Event { name, payload })
}

/// Encode a Socket.IO CONNECT frame carrying the auth token.
pub fn connect_frame(token: &str) -> String {
    let auth = serde_json::json!({ "token": token });
    format!("40{auth}")
}

/// Encode a Socket.IO EVENT frame: `42["name", payload]`.
pub fn emit_frame(event: &str, payload: &serde_json::Value) -> Result<String> {
    if event.trim().is_empty() {
        return Err(Error::Gateway("event name is required".into()));
    }
    let arr = serde_json::json!([event, payload]);
    Ok(format!("42{arr}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_on_record_separator() {
        let msg = format!("2{}42[\"MESSAGE_CREATE\",{{}}]", FRAME_SEPARATOR);
        let frames: Vec<&str> = split_frames(&msg).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], "2");
    }

    #[test]
    fn parses_engine_io_control_frames() {
        assert_eq!(parse_frame("0{\"sid\":\"x\"}").unwrap(), Frame::Open);
        assert_eq!(parse_frame("1").unwrap(), Frame::Close);
        assert_eq!(parse_frame("2").unwrap(), Frame::Ping);
        assert_eq!(parse_frame("3").unwrap(), Frame::Pong);
        assert_eq!(parse_frame("40").unwrap(), Frame::ConnectAck);
    }

    #[test]
    fn parses_event_frame() {
        let frame =
            parse_frame(r#"42["MESSAGE_CREATE",{"_id":"M1","channelId":"C1"}]"#).unwrap();
        match frame {
            Frame::Event { name, payload } => {
                assert_eq!(name, "MESSAGE_CREATE");
                assert_eq!(payload["_id"], "M1");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn event_without_payload_is_null() {
        let frame = parse_frame(r#"42["PING_EVENT"]"#).unwrap();
        assert_eq!(frame, Frame::Event { name: "PING_EVENT".into(), payload: json!(null) });
    }

    #[test]
    fn socket_error_frame_surfaces() {
        match parse_frame("44{\"message\":\"bad auth\"}").unwrap() {
            Frame::SocketError(body) => assert!(body.contains("bad auth")),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn malformed_event_is_an_error() {
        assert!(parse_frame("42{not json").is_err());
    }

    #[test]
    fn emit_frame_round_trips() {
        let frame = emit_frame("message/create", &json!({"channelId": "C1", "content": "hi"})).unwrap();
        assert!(frame.starts_with("42[\"message/create\""));
        match parse_frame(&frame).unwrap() {
            Frame::Event { name, payload } => {
                assert_eq!(name, "message/create");
                assert_eq!(payload["content"], "hi");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn connect_frame_embeds_token() {
        assert_eq!(connect_frame("jwt123"), r#"40{"token":"jwt123"}"#);
    }
}
