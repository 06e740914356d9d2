use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, SyncError};
use crate::models::{Message, MessageKind, MessageReceipt, ReactionMap};

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ClientIntent {
    /// Authenticate the WebSocket connection
    #[serde(rename = "session:identify")]
    Identify { token: String },

    /// Join the broadcast rooms of the given chats
    #[serde(rename = "chat:subscribe")]
    Subscribe { chat_ids: Vec<Uuid> },

    #[serde(rename = "chat:unsubscribe")]
    Unsubscribe { chat_ids: Vec<Uuid> },

    #[serde(rename = "message:send")]
    Send {
        chat_id: Uuid,
        content: String,
        #[serde(rename = "type", default)]
        kind: MessageKind,
        #[serde(default)]
        reply_to_id: Option<Uuid>,
        /// Provisional id chosen by the client, echoed back on `message:new`.
        #[serde(default)]
        client_id: Option<Uuid>,
    },

    #[serde(rename = "message:edit")]
    Edit { id: Uuid, content: String },

    #[serde(rename = "message:delete")]
    Delete { id: Uuid },

    #[serde(rename = "reaction:toggle")]
    ToggleReaction { message_id: Uuid, emoji: String },

    #[serde(rename = "read:mark")]
    MarkRead { chat_id: Uuid, upto: DateTime<Utc> },

    /// Flip the pinned flag of a message
    #[serde(rename = "message:pin")]
    Pin { id: Uuid },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { chat_id: Uuid },

    #[serde(rename = "message:forward")]
    Forward { id: Uuid, target_chat_ids: Vec<Uuid> },
}

/// Events sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    #[serde(rename = "session:ready")]
    Ready {
        user_id: Uuid,
        username: String,
        session_id: Uuid,
    },

    #[serde(rename = "message:new")]
    MessageNew {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<Uuid>,
        /// Read aggregate at send time; the author already counts.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receipt: Option<MessageReceipt>,
    },

    #[serde(rename = "message:edited")]
    MessageEdited {
        id: Uuid,
        chat_id: Uuid,
        content: String,
        edited_at: DateTime<Utc>,
    },

    #[serde(rename = "message:deleted")]
    MessageDeleted { chat_id: Uuid, id: Uuid },

    /// Full emoji map of one message; replaces whatever the client holds.
    #[serde(rename = "reaction:updated")]
    ReactionUpdated {
        message_id: Uuid,
        chat_id: Uuid,
        reactions: ReactionMap,
    },

    /// `user_id` advanced their watermark to `upto`; `receipts` replace the
    /// aggregate read state of the messages that advance covered.
    #[serde(rename = "read:updated")]
    ReadUpdated {
        chat_id: Uuid,
        user_id: Uuid,
        upto: DateTime<Utc>,
        receipts: Vec<MessageReceipt>,
    },

    #[serde(rename = "message:pinned")]
    MessagePinned {
        id: Uuid,
        chat_id: Uuid,
        pinned: bool,
        pinned_by: Option<Uuid>,
        pinned_at: Option<DateTime<Utc>>,
    },

    #[serde(rename = "typing:start")]
    TypingStart { chat_id: Uuid, user_id: Uuid },

    #[serde(rename = "typing:stop")]
    TypingStop { chat_id: Uuid, user_id: Uuid },

    #[serde(rename = "user:online")]
    UserOnline { user_id: Uuid },

    #[serde(rename = "user:offline")]
    UserOffline {
        user_id: Uuid,
        last_seen: DateTime<Utc>,
    },

    /// Delivered only to the session whose intent failed.
    #[serde(rename = "error")]
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<IntentRef>,
    },
}

impl ServerEvent {
    /// Returns the chat_id if this event is scoped to a specific chat room.
    /// Events that return `None` are delivered to explicitly chosen sessions.
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageNew { message, .. } => Some(message.chat_id),
            Self::MessageEdited { chat_id, .. }
            | Self::MessageDeleted { chat_id, .. }
            | Self::ReactionUpdated { chat_id, .. }
            | Self::ReadUpdated { chat_id, .. }
            | Self::MessagePinned { chat_id, .. }
            | Self::TypingStart { chat_id, .. }
            | Self::TypingStop { chat_id, .. } => Some(*chat_id),
            // Ready, presence and errors are targeted
            _ => None,
        }
    }

    pub fn error(err: &SyncError, intent: Option<IntentRef>) -> Self {
        Self::Error {
            code: err.code(),
            message: err.to_string(),
            intent,
        }
    }
}

/// Identifies which intent an `error` event answers, carrying just enough for
/// the client to revert its optimistic change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum IntentRef {
    Identify,
    Subscribe { chat_ids: Vec<Uuid> },
    Unsubscribe { chat_ids: Vec<Uuid> },
    Send { chat_id: Uuid, client_id: Option<Uuid> },
    Edit { id: Uuid },
    Delete { id: Uuid },
    ToggleReaction { message_id: Uuid, emoji: String },
    MarkRead { chat_id: Uuid },
    Pin { id: Uuid },
    Typing { chat_id: Uuid },
    Forward { id: Uuid },
}

/// Shape limits applied to every intent before it reaches an aggregator.
#[derive(Debug, Clone)]
pub struct IntentLimits {
    pub max_content_chars: usize,
    pub max_emoji_bytes: usize,
    pub max_forward_targets: usize,
    pub max_subscriptions: usize,
}

impl Default for IntentLimits {
    fn default() -> Self {
        Self {
            max_content_chars: 4000,
            max_emoji_bytes: 32,
            max_forward_targets: 10,
            max_subscriptions: 500,
        }
    }
}

impl ClientIntent {
    /// Wire name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "session:identify",
            Self::Subscribe { .. } => "chat:subscribe",
            Self::Unsubscribe { .. } => "chat:unsubscribe",
            Self::Send { .. } => "message:send",
            Self::Edit { .. } => "message:edit",
            Self::Delete { .. } => "message:delete",
            Self::ToggleReaction { .. } => "reaction:toggle",
            Self::MarkRead { .. } => "read:mark",
            Self::Pin { .. } => "message:pin",
            Self::TypingStart { .. } => "typing:start",
            Self::TypingStop { .. } => "typing:stop",
            Self::Forward { .. } => "message:forward",
        }
    }

    pub fn reference(&self) -> IntentRef {
        match self {
            Self::Identify { .. } => IntentRef::Identify,
            Self::Subscribe { chat_ids } => IntentRef::Subscribe {
                chat_ids: chat_ids.clone(),
            },
            Self::Unsubscribe { chat_ids } => IntentRef::Unsubscribe {
                chat_ids: chat_ids.clone(),
            },
            Self::Send {
                chat_id, client_id, ..
            } => IntentRef::Send {
                chat_id: *chat_id,
                client_id: *client_id,
            },
            Self::Edit { id, .. } => IntentRef::Edit { id: *id },
            Self::Delete { id } => IntentRef::Delete { id: *id },
            Self::ToggleReaction { message_id, emoji } => IntentRef::ToggleReaction {
                message_id: *message_id,
                emoji: emoji.clone(),
            },
            Self::MarkRead { chat_id, .. } => IntentRef::MarkRead { chat_id: *chat_id },
            Self::Pin { id } => IntentRef::Pin { id: *id },
            Self::TypingStart { chat_id } | Self::TypingStop { chat_id } => {
                IntentRef::Typing { chat_id: *chat_id }
            }
            Self::Forward { id, .. } => IntentRef::Forward { id: *id },
        }
    }

    /// Synchronous shape check. Anything rejected here never touches state.
    pub fn validate(&self, limits: &IntentLimits) -> Result<(), SyncError> {
        match self {
            Self::Identify { token } => {
                if token.trim().is_empty() {
                    return Err(SyncError::validation("token is required"));
                }
            }
            Self::Subscribe { chat_ids } | Self::Unsubscribe { chat_ids } => {
                if chat_ids.is_empty() {
                    return Err(SyncError::validation("chatIds must not be empty"));
                }
                if chat_ids.len() > limits.max_subscriptions {
                    return Err(SyncError::validation(format!(
                        "at most {} chats per request",
                        limits.max_subscriptions
                    )));
                }
            }
            Self::Send { content, .. } | Self::Edit { content, .. } => {
                validate_content(content, limits)?;
            }
            Self::ToggleReaction { emoji, .. } => {
                if emoji.is_empty() || emoji.chars().any(char::is_whitespace) {
                    return Err(SyncError::validation("emoji must be a non-blank token"));
                }
                if emoji.len() > limits.max_emoji_bytes {
                    return Err(SyncError::validation(format!(
                        "emoji exceeds {} bytes",
                        limits.max_emoji_bytes
                    )));
                }
            }
            Self::Forward {
                target_chat_ids, ..
            } => {
                if target_chat_ids.is_empty() {
                    return Err(SyncError::validation("targetChatIds must not be empty"));
                }
                if target_chat_ids.len() > limits.max_forward_targets {
                    return Err(SyncError::validation(format!(
                        "at most {} forward targets",
                        limits.max_forward_targets
                    )));
                }
                let distinct: HashSet<&Uuid> = target_chat_ids.iter().collect();
                if distinct.len() != target_chat_ids.len() {
                    return Err(SyncError::validation("targetChatIds contains duplicates"));
                }
            }
            Self::Delete { .. }
            | Self::MarkRead { .. }
            | Self::Pin { .. }
            | Self::TypingStart { .. }
            | Self::TypingStop { .. } => {}
        }
        Ok(())
    }
}

fn validate_content(content: &str, limits: &IntentLimits) -> Result<(), SyncError> {
    if content.trim().is_empty() {
        return Err(SyncError::validation("content must not be empty"));
    }
    let chars = content.chars().count();
    if chars > limits.max_content_chars {
        return Err(SyncError::validation(format!(
            "content is {} characters, limit is {}",
            chars, limits.max_content_chars
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn send_intent_parses_wire_shape() {
        let chat = Uuid::new_v4();
        let raw = json!({
            "type": "message:send",
            "data": { "chatId": chat, "content": "hi", "type": "text" }
        });
        let intent: ClientIntent = serde_json::from_value(raw).unwrap();
        match intent {
            ClientIntent::Send {
                chat_id,
                kind,
                reply_to_id,
                client_id,
                ..
            } => {
                assert_eq!(chat_id, chat);
                assert_eq!(kind, MessageKind::Text);
                assert!(reply_to_id.is_none());
                assert!(client_id.is_none());
            }
            other => panic!("unexpected intent {:?}", other),
        }
    }

    #[test]
    fn missing_required_field_is_rejected_by_parser() {
        let raw = json!({ "type": "reaction:toggle", "data": { "emoji": "👍" } });
        assert!(serde_json::from_value::<ClientIntent>(raw).is_err());
    }

    #[test]
    fn unknown_intent_is_rejected_by_parser() {
        let raw = json!({ "type": "message:explode", "data": {} });
        assert!(serde_json::from_value::<ClientIntent>(raw).is_err());
    }

    #[test]
    fn oversized_content_fails_validation() {
        let limits = IntentLimits {
            max_content_chars: 5,
            ..IntentLimits::default()
        };
        let intent = ClientIntent::Send {
            chat_id: Uuid::new_v4(),
            content: "héllo!".into(),
            kind: MessageKind::Text,
            reply_to_id: None,
            client_id: None,
        };
        let err = intent.validate(&limits).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Validation);

        // Counted in characters, not bytes
        let ok = ClientIntent::Edit {
            id: Uuid::new_v4(),
            content: "héllo".into(),
        };
        assert!(ok.validate(&limits).is_ok());
    }

    #[test]
    fn blank_content_and_emoji_fail_validation() {
        let limits = IntentLimits::default();
        let blank = ClientIntent::Edit {
            id: Uuid::new_v4(),
            content: "   ".into(),
        };
        assert!(blank.validate(&limits).is_err());

        let emoji = ClientIntent::ToggleReaction {
            message_id: Uuid::new_v4(),
            emoji: "".into(),
        };
        assert!(emoji.validate(&limits).is_err());
    }

    #[test]
    fn forward_targets_must_be_distinct() {
        let chat = Uuid::new_v4();
        let intent = ClientIntent::Forward {
            id: Uuid::new_v4(),
            target_chat_ids: vec![chat, chat],
        };
        assert!(intent.validate(&IntentLimits::default()).is_err());
    }

    #[test]
    fn error_event_carries_intent_reference() {
        let message_id = Uuid::new_v4();
        let intent = ClientIntent::ToggleReaction {
            message_id,
            emoji: "👍".into(),
        };
        let event = ServerEvent::error(
            &SyncError::not_found("message"),
            Some(intent.reference()),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["data"]["code"], "NOT_FOUND");
        assert_eq!(value["data"]["intent"]["kind"], "toggleReaction");
        assert_eq!(value["data"]["intent"]["messageId"], json!(message_id));
        assert!(event.chat_id().is_none());
    }

    #[test]
    fn chat_scoped_events_report_their_chat() {
        let chat_id = Uuid::new_v4();
        let event = ServerEvent::MessageDeleted {
            chat_id,
            id: Uuid::new_v4(),
        };
        assert_eq!(event.chat_id(), Some(chat_id));
        assert!(
            ServerEvent::UserOnline {
                user_id: Uuid::new_v4()
            }
            .chat_id()
            .is_none()
        );
    }
}
