use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use parley_types::api::{Claims, ReadStatusRequest, ReadStatusResponse};

use crate::AppState;
use crate::error::ApiError;

pub async fn read_status(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReadStatusRequest>,
) -> Result<Json<ReadStatusResponse>, ApiError> {
    let requester = claims.sub;
    let statuses = crate::blocking(&state, move |s| {
        s.receipts.compute_read_status(requester, chat_id, &req.message_ids)
    })
    .await?;

    Ok(Json(ReadStatusResponse { chat_id, statuses }))
}
