use std::{future::Future, sync::Arc, time::Duration};

use serde_json::Value;
use shared::{
    domain::{FollowEdge, RecordId, UserId},
    protocol::FollowStats,
};
use storage::{DocumentStore, EqualityFilter, Fields};
use tracing::{debug, error, info, warn};

use crate::error::FollowError;

pub const DEFAULT_FOLLOWS_COLLECTION: &str = "follows";
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const FOLLOWER_FIELD: &str = "followerId";
const FOLLOWING_FIELD: &str = "followingId";

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub collection: String,
    /// Read failures return `false`/`0` instead of an error.
    pub degrade_on_error: bool,
    pub call_timeout: Option<Duration>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            collection: DEFAULT_FOLLOWS_COLLECTION.into(),
            degrade_on_error: true,
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

/// Follow edges kept in the document store. Holds no cache: every query goes
/// to the store.
///
/// `follow` does not look for an existing edge first, so calling it twice for
/// the same pair leaves two edges behind. Callers are expected to check
/// `is_following` (or track state, as the toggle controller does) first.
pub struct FollowRelationshipService {
    store: Arc<dyn DocumentStore>,
    options: ServiceOptions,
}

impl FollowRelationshipService {
    pub fn new(store: Arc<dyn DocumentStore>, options: ServiceOptions) -> Self {
        Self { store, options }
    }

    pub async fn follow(
        &self,
        follower_id: &UserId,
        following_id: &UserId,
    ) -> Result<FollowEdge, FollowError> {
        let mut fields = Fields::new();
        fields.insert(FOLLOWER_FIELD.into(), Value::String(follower_id.0.clone()));
        fields.insert(FOLLOWING_FIELD.into(), Value::String(following_id.0.clone()));

        let record = self
            .call(
                "follow",
                self.store
                    .create_record(&self.options.collection, RecordId::unique(), fields),
            )
            .await
            .map_err(|error| {
                error!(%follower_id, %following_id, %error, "error following user");
                error
            })?;

        info!(%follower_id, %following_id, edge_id = %record.id, "follow edge created");
        Ok(FollowEdge {
            id: record.id,
            follower_id: follower_id.clone(),
            following_id: following_id.clone(),
            created_at: record.created_at,
        })
    }

    pub async fn unfollow(
        &self,
        follower_id: &UserId,
        following_id: &UserId,
    ) -> Result<(), FollowError> {
        let result = self.remove_first_edge(follower_id, following_id).await;
        if let Err(error) = &result {
            error!(%follower_id, %following_id, %error, "error unfollowing user");
        }
        result
    }

    async fn remove_first_edge(
        &self,
        follower_id: &UserId,
        following_id: &UserId,
    ) -> Result<(), FollowError> {
        let filters = pair_filters(follower_id, following_id);
        let page = self
            .call(
                "unfollow",
                self.store.query_records(&self.options.collection, &filters),
            )
            .await?;

        let Some(edge) = page.documents.into_iter().next() else {
            return Err(FollowError::NotFound {
                follower_id: follower_id.clone(),
                following_id: following_id.clone(),
            });
        };

        self.call(
            "unfollow",
            self.store.delete_record(&self.options.collection, &edge.id),
        )
        .await?;
        info!(%follower_id, %following_id, edge_id = %edge.id, "follow edge removed");
        Ok(())
    }

    pub async fn is_following(
        &self,
        follower_id: &UserId,
        following_id: &UserId,
    ) -> Result<bool, FollowError> {
        let filters = pair_filters(follower_id, following_id);
        let result = self
            .call(
                "is_following",
                self.store.query_records(&self.options.collection, &filters),
            )
            .await
            .map(|page| !page.documents.is_empty());
        self.degrade("is_following", result, false)
    }

    /// Number of edges pointing at `user_id`.
    pub async fn followers_count(&self, user_id: &UserId) -> Result<u64, FollowError> {
        let filters = [EqualityFilter::new(FOLLOWING_FIELD, user_id.as_str())];
        let result = self
            .call(
                "followers_count",
                self.store.query_records(&self.options.collection, &filters),
            )
            .await
            .map(|page| page.total);
        self.degrade("followers_count", result, 0)
    }

    /// Number of edges starting at `user_id`.
    pub async fn following_count(&self, user_id: &UserId) -> Result<u64, FollowError> {
        let filters = [EqualityFilter::new(FOLLOWER_FIELD, user_id.as_str())];
        let result = self
            .call(
                "following_count",
                self.store.query_records(&self.options.collection, &filters),
            )
            .await
            .map(|page| page.total);
        self.degrade("following_count", result, 0)
    }

    pub async fn follow_stats(
        &self,
        viewer_id: &UserId,
        user_id: &UserId,
    ) -> Result<FollowStats, FollowError> {
        let (followers, following, is_following, is_followed_by) = tokio::join!(
            self.followers_count(user_id),
            self.following_count(user_id),
            self.is_following(viewer_id, user_id),
            self.is_following(user_id, viewer_id),
        );
        Ok(FollowStats {
            user_id: user_id.clone(),
            followers_count: followers?,
            following_count: following?,
            is_following: is_following?,
            is_followed_by: is_followed_by?,
        })
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, FollowError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let result = match self.options.call_timeout {
            Some(after) => match tokio::time::timeout(after, fut).await {
                Ok(result) => result,
                Err(_) => return Err(FollowError::Timeout { operation, after }),
            },
            None => fut.await,
        };
        result.map_err(|source| FollowError::Backend { operation, source })
    }

    fn degrade<T: std::fmt::Debug>(
        &self,
        operation: &'static str,
        result: Result<T, FollowError>,
        default: T,
    ) -> Result<T, FollowError> {
        match result {
            Ok(value) => Ok(value),
            Err(error) if self.options.degrade_on_error => {
                warn!(operation, %error, ?default, "follow query failed; using default");
                Ok(default)
            }
            Err(error) => {
                debug!(operation, %error, "follow query failed");
                Err(error)
            }
        }
    }
}

fn pair_filters(follower_id: &UserId, following_id: &UserId) -> [EqualityFilter; 2] {
    [
        EqualityFilter::new(FOLLOWER_FIELD, follower_id.as_str()),
        EqualityFilter::new(FOLLOWING_FIELD, following_id.as_str()),
    ]
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
