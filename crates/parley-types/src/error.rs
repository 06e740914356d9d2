use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by the gateway, the REST surface and clients.
///
/// Every variant means "no state changed": aggregators never commit partially
/// before returning one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Authenticated, but not allowed to touch the target (not a member,
    /// not the author).
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    TransientStore(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Auth,
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    TransientStore,
}

impl SyncError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(_) => ErrorCode::Auth,
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::TransientStore(_) => ErrorCode::TransientStore,
        }
    }

    /// Whether the sender should retry the same intent unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStore(_) | Self::Conflict(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}
