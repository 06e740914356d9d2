use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use parley_types::SyncError;
use parley_types::api::ErrorBody;

/// A [`SyncError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            SyncError::Auth(_) => StatusCode::UNAUTHORIZED,
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Forbidden(_) => StatusCode::FORBIDDEN,
            SyncError::Conflict(_) => StatusCode::CONFLICT,
            SyncError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}
