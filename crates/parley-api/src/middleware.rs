use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use parley_types::SyncError;

use crate::AppState;
use crate::error::ApiError;

/// Extract and validate the bearer token, then hand the claims to handlers
/// as an `Extension<Claims>`.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(SyncError::Auth("missing authorization header".into())))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError(SyncError::Auth("expected a bearer token".into())))?;

    let claims = state.dispatcher.validator().validate(token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
