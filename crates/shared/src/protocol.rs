use serde::{Deserialize, Serialize};

use crate::domain::UserId;

/// Relationship counters for one user, as seen by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowStats {
    pub user_id: UserId,
    pub followers_count: u64,
    pub following_count: u64,
    pub is_following: bool,
    pub is_followed_by: bool,
}

/// User-visible notification emitted by the follow button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}
