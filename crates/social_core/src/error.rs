use std::time::Duration;

use shared::{
    domain::UserId,
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

/// Failures surfaced by the follow relationship service.
#[derive(Debug, Error)]
pub enum FollowError {
    #[error("{operation} rejected by the follow store: {source}")]
    Backend {
        operation: &'static str,
        source: anyhow::Error,
    },
    #[error("Follow relationship not found")]
    NotFound {
        follower_id: UserId,
        following_id: UserId,
    },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl FollowError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Backend { .. } => ErrorCode::Internal,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Timeout { .. } => ErrorCode::Unavailable,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<&FollowError> for ApiError {
    fn from(value: &FollowError) -> Self {
        ApiError::new(value.code(), value.to_string())
    }
}

/// Why a toggle could not be committed.
#[derive(Debug, Error)]
pub enum ToggleFailure {
    #[error(transparent)]
    Service(#[from] FollowError),
    #[error("follow change hook failed: {0}")]
    Hook(#[source] anyhow::Error),
}

/// Controller-level failure: the user has been (or is about to be) told the
/// toggle did not go through, whatever the underlying cause was.
#[derive(Debug, Error)]
#[error("failed to update follow state for {target}")]
pub struct PresentationError {
    pub target: UserId,
    #[source]
    pub cause: ToggleFailure,
}
