//! Database row types. These map directly to SQLite rows and are distinct
//! from the parley-types models to keep the DB layer independent; the
//! `into_*` conversions are where corrupt rows surface.

use chrono::{DateTime, TimeZone, Utc};
use parley_types::models::{Member, Message, PinInfo};
use uuid::Uuid;

use crate::{Result, StoreError};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub last_seen: Option<i64>,
}

pub struct MemberRow {
    pub chat_id: String,
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub joined_at: i64,
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub kind: String,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub forwarded_from: Option<String>,
    pub created_at: i64,
    pub edited_at: Option<i64>,
    pub pinned_by: Option<String>,
    pub pinned_at: Option<i64>,
}

pub struct ReactionCountRow {
    pub message_id: String,
    pub emoji: String,
    pub count: u32,
}

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} out of range", ms)))
}

pub fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("bad uuid '{}': {}", raw, e)))
}

fn parse_opt_id(raw: Option<&str>) -> Result<Option<Uuid>> {
    raw.map(parse_id).transpose()
}

impl MessageRow {
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            chat_id: message.chat_id.to_string(),
            sender_id: message.author_id.to_string(),
            kind: message.kind.as_str().to_string(),
            content: message.content.clone(),
            reply_to_id: message.reply_to_id.map(|id| id.to_string()),
            forwarded_from: message.forwarded_from.map(|id| id.to_string()),
            created_at: to_millis(message.created_at),
            edited_at: message.edited_at.map(to_millis),
            pinned_by: message.pin.as_ref().map(|p| p.pinned_by.to_string()),
            pinned_at: message.pin.as_ref().map(|p| to_millis(p.pinned_at)),
        }
    }

    pub fn into_message(self) -> Result<Message> {
        let pin = match (self.pinned_by.as_deref(), self.pinned_at) {
            (Some(by), Some(at)) => Some(PinInfo {
                pinned_by: parse_id(by)?,
                pinned_at: from_millis(at)?,
            }),
            _ => None,
        };

        Ok(Message {
            id: parse_id(&self.id)?,
            chat_id: parse_id(&self.chat_id)?,
            author_id: parse_id(&self.sender_id)?,
            kind: self.kind.parse().map_err(StoreError::Corrupt)?,
            content: self.content,
            created_at: from_millis(self.created_at)?,
            edited_at: self.edited_at.map(from_millis).transpose()?,
            reply_to_id: parse_opt_id(self.reply_to_id.as_deref())?,
            forwarded_from: parse_opt_id(self.forwarded_from.as_deref())?,
            pin,
        })
    }
}

impl MemberRow {
    pub fn into_member(self) -> Result<Member> {
        Ok(Member {
            user_id: parse_id(&self.user_id)?,
            username: self.username,
            role: self.role,
            joined_at: from_millis(self.joined_at)?,
        })
    }
}
