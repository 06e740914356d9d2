pub mod error;
pub mod members;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod receipts;

use std::sync::Arc;

use axum::{
    Json, Router, middleware as axum_middleware,
    routing::{get, post},
};
use tracing::error;

use parley_gateway::Services;
use parley_gateway::dispatcher::Dispatcher;
use parley_types::SyncError;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    /// Owns the services and the token validator the REST surface shares
    /// with WebSocket connections.
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    pub fn new(dispatcher: Dispatcher) -> AppState {
        Arc::new(Self { dispatcher })
    }
}

/// Every REST route. Everything except `/health` requires a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route("/chats/{chat_id}/messages", get(messages::get_messages))
        .route("/chats/{chat_id}/read-status", post(receipts::read_status))
        .route("/chats/{chat_id}/members", get(members::get_members))
        .route("/messages/{message_id}/reactions", get(reactions::get_reactions))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run a store-backed call off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Services) -> Result<T, SyncError> + Send + 'static,
    T: Send + 'static,
{
    let services = state.dispatcher.services();
    tokio::task::spawn_blocking(move || f(&services))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError(SyncError::TransientStore("worker task failed".into()))
        })?
        .map_err(ApiError)
}
