//! Wire types for the Mew server API and gateway payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bot descriptor from `POST /bots/bootstrap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapBot {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Opaque per-bot configuration blob (JSON string).
    #[serde(default)]
    pub config: String,
    #[serde(rename = "accessToken", default)]
    pub access_token: String,
    #[serde(rename = "serviceType", default)]
    pub service_type: String,
    #[serde(rename = "dmEnabled", default)]
    pub dm_enabled: bool,
}

/// The authenticated bot user returned by `POST /auth/bot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(rename = "isBot", default)]
    pub is_bot: bool,
}

/// Message author. The server populates `authorId` either as a bare user id
/// string or as an expanded user object, depending on the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthorRef {
    Id(String),
    User(User),
}

impl AuthorRef {
    pub fn id(&self) -> &str {
        match self {
            AuthorRef::Id(id) => id,
            AuthorRef::User(u) => &u.id,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            AuthorRef::Id(_) => "",
            AuthorRef::User(u) => &u.username,
        }
    }

    pub fn is_bot(&self) -> bool {
        match self {
            AuthorRef::Id(_) => false,
            AuthorRef::User(u) => u.is_bot,
        }
    }
}

/// An attachment reference on a channel message: either a storage key served
/// by the channel's authenticated upload endpoint, or a direct URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentRef {
    #[serde(default)]
    pub filename: String,
    #[serde(rename = "contentType", default)]
    pub content_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub url: String,
}

impl AttachmentRef {
    pub fn is_image(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("image/")
    }
}

/// A channel message as observed from the gateway or the history API.
/// Immutable once observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "channelId", default)]
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "authorId")]
    pub author: Option<AuthorRef>,
    #[serde(rename = "retractedAt", default, skip_serializing_if = "Option::is_none")]
    pub retracted_at: Option<DateTime<Utc>>,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

impl ChannelMessage {
    pub fn author_id(&self) -> &str {
        self.author.as_ref().map(AuthorRef::id).unwrap_or_default()
    }

    pub fn author_username(&self) -> &str {
        self.author.as_ref().map(AuthorRef::username).unwrap_or_default()
    }

    pub fn is_retracted(&self) -> bool {
        self.retracted_at.is_some()
    }
}

/// A channel from `GET /users/@me/channels`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl Channel {
    pub fn is_dm(&self) -> bool {
        self.kind == "DM"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_ref_decodes_both_forms() {
        let bare: ChannelMessage =
            serde_json::from_str(r#"{"_id":"M1","channelId":"C1","authorId":"U1"}"#).unwrap();
        assert_eq!(bare.author_id(), "U1");
        assert_eq!(bare.author_username(), "");

        let expanded: ChannelMessage = serde_json::from_str(
            r#"{"_id":"M2","channelId":"C1","authorId":{"_id":"U2","username":"kana","isBot":false}}"#,
        )
        .unwrap();
        assert_eq!(expanded.author_id(), "U2");
        assert_eq!(expanded.author_username(), "kana");
    }

    #[test]
    fn bootstrap_bot_decodes_server_shape() {
        let bot: BootstrapBot = serde_json::from_str(
            r#"{"_id":"B1","name":"Nya","config":"{}","accessToken":"tok","serviceType":"assistant-agent","dmEnabled":true}"#,
        )
        .unwrap();
        assert_eq!(bot.id, "B1");
        assert!(bot.dm_enabled);
    }

    #[test]
    fn dm_channel_detection() {
        let ch: Channel = serde_json::from_str(r#"{"_id":"C1","type":"DM"}"#).unwrap();
        assert!(ch.is_dm());
        let guild: Channel = serde_json::from_str(r#"{"_id":"G1","type":"text"}"#).unwrap();
        assert!(!guild.is_dm());
    }
}
