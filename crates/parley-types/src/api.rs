use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCode, SyncError};
use crate::models::{Message, ReactionMap, ReadStatus};

// -- JWT Claims --

/// JWT claims shared across parley-api (REST middleware) and parley-gateway
/// (WebSocket authentication). Tokens are minted by the external auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    #[serde(flatten)]
    pub message: Message,
    pub reactions: ReactionMap,
}

/// Position of the oldest message on a page. Ties on `created_at` are broken
/// by `id`, matching the history order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<HistoryMessage>,
    /// Pass back as `before` and `beforeId` to fetch the next (older) page.
    pub next_before: Option<HistoryCursor>,
}

// -- Read receipts --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReadStatusRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadStatusResponse {
    pub chat_id: Uuid,
    pub statuses: Vec<ReadStatus>,
}

// -- Roster --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

// -- Reactions --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSnapshotResponse {
    pub message_id: Uuid,
    pub reactions: ReactionMap,
}

// -- Errors --

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub error: String,
}

impl From<&SyncError> for ErrorBody {
    fn from(err: &SyncError) -> Self {
        Self {
            code: err.code(),
            error: err.to_string(),
        }
    }
}
