use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emoji -> number of users holding that reaction. Emojis with zero holders
/// are never present.
pub type ReactionMap = BTreeMap<String, u32>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    Voice,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Voice => "voice",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "voice" => Ok(Self::Voice),
            other => Err(format!("unknown message kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinInfo {
    pub pinned_by: Uuid,
    pub pinned_at: DateTime<Utc>,
}

/// A chat message as the server stores and broadcasts it.
///
/// For non-text kinds `content` is a reference to an uploaded file, not the
/// payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub author_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<PinInfo>,
}

impl Message {
    pub fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }
}

/// Aggregate read state of one message, as broadcast to every member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceipt {
    pub message_id: Uuid,
    pub read_count: u32,
    pub total_members: u32,
}

/// Read state of one message from the point of view of a requesting member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatus {
    pub message_id: Uuid,
    pub is_read_by_requester: bool,
    pub read_count: u32,
    pub total_members: u32,
}

impl From<ReadStatus> for MessageReceipt {
    fn from(status: ReadStatus) -> Self {
        Self {
            message_id: status.message_id,
            read_count: status.read_count,
            total_members: status.total_members,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
    pub joined_at: DateTime<Utc>,
}
