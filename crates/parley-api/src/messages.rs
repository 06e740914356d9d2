use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use parley_gateway::messages::{DEFAULT_PAGE, MAX_PAGE};
use parley_types::api::{Claims, HistoryCursor, HistoryMessage, HistoryPage};
use parley_types::models::ReactionMap;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: `createdAt` and `id` of the oldest message on the previous page.
    pub before: Option<DateTime<Utc>>,
    pub before_id: Option<Uuid>,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE
}

/// Newest-first history with each message's reaction map.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<HistoryPage>, ApiError> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let (before, before_id) = (query.before, query.before_id);
    let user_id = claims.sub;

    let (messages, reaction_rows) = crate::blocking(&state, move |s| {
        let messages = s.messages.history(user_id, chat_id, limit, before, before_id)?;
        let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
        let reaction_rows = s.db.reaction_counts_for_messages(&ids)?;
        Ok((messages, reaction_rows))
    })
    .await?;

    let mut reactions: HashMap<String, ReactionMap> = HashMap::new();
    for row in reaction_rows {
        reactions
            .entry(row.message_id)
            .or_default()
            .insert(row.emoji, row.count);
    }

    let next_before = if messages.len() == limit as usize {
        messages.last().map(|m| HistoryCursor {
            created_at: m.created_at,
            id: m.id,
        })
    } else {
        None
    };

    let messages = messages
        .into_iter()
        .map(|message| HistoryMessage {
            reactions: reactions.remove(&message.id.to_string()).unwrap_or_default(),
            message,
        })
        .collect();

    Ok(Json(HistoryPage { messages, next_before }))
}
