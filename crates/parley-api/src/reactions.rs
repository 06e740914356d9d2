use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_types::api::{Claims, ReactionSnapshotResponse};

use crate::AppState;
use crate::error::ApiError;

pub async fn get_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ReactionSnapshotResponse>, ApiError> {
    let user_id = claims.sub;
    let reactions = crate::blocking(&state, move |s| {
        s.messages.chat_of(user_id, message_id)?;
        s.reactions.snapshot(message_id)
    })
    .await?;

    Ok(Json(ReactionSnapshotResponse { message_id, reactions }))
}
