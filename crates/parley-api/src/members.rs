use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_db::models::{from_millis, parse_id};
use parley_gateway::membership::require_member;
use parley_types::SyncError;
use parley_types::api::{Claims, RosterEntry};
use parley_types::models::PresenceStatus;

use crate::AppState;
use crate::error::ApiError;

/// Chat roster with live presence. `lastSeen` is the persisted value, written
/// when a user's last connection closes.
pub async fn get_members(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<RosterEntry>>, ApiError> {
    let user_id = claims.sub;
    let rows = crate::blocking(&state, move |s| {
        require_member(s.membership.as_ref(), chat_id, user_id)?;
        Ok(s.db.get_members(&chat_id.to_string())?)
    })
    .await?;

    let mut roster = Vec::with_capacity(rows.len());
    for row in rows {
        let member_id = parse_id(&row.user_id).map_err(SyncError::from)?;
        let persisted = row
            .last_seen
            .map(from_millis)
            .transpose()
            .map_err(SyncError::from)?;
        let presence = state.dispatcher.presence(member_id);

        roster.push(RosterEntry {
            user_id: member_id,
            username: row.username,
            role: row.role,
            online: presence.status == PresenceStatus::Online,
            last_seen: persisted,
        });
    }

    Ok(Json(roster))
}
