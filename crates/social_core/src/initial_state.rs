//! Strategies for the follow state a controller starts from.

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use shared::domain::UserId;

use crate::service::FollowRelationshipService;

#[async_trait]
pub trait InitialStateProvider: Send + Sync {
    async fn initial_state(&self, viewer_id: &UserId, target_id: &UserId) -> anyhow::Result<bool>;
}

/// Asks the relationship service whether the edge exists.
pub struct ServiceInitialState {
    service: Arc<FollowRelationshipService>,
}

impl ServiceInitialState {
    pub fn new(service: Arc<FollowRelationshipService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl InitialStateProvider for ServiceInitialState {
    async fn initial_state(&self, viewer_id: &UserId, target_id: &UserId) -> anyhow::Result<bool> {
        Ok(self.service.is_following(viewer_id, target_id).await?)
    }
}

/// Fixed answer, for running without a live backend.
pub struct AssumedInitialState(pub bool);

#[async_trait]
impl InitialStateProvider for AssumedInitialState {
    async fn initial_state(&self, _viewer_id: &UserId, _target_id: &UserId) -> anyhow::Result<bool> {
        Ok(self.0)
    }
}

/// Coin flip, for demo screens.
pub struct RandomInitialState;

#[async_trait]
impl InitialStateProvider for RandomInitialState {
    async fn initial_state(&self, _viewer_id: &UserId, _target_id: &UserId) -> anyhow::Result<bool> {
        Ok(rand::random::<bool>())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialStateStrategy {
    #[default]
    Query,
    AssumeFollowing,
    AssumeNotFollowing,
    Random,
}

impl InitialStateStrategy {
    pub fn provider(
        self,
        service: Arc<FollowRelationshipService>,
    ) -> Arc<dyn InitialStateProvider> {
        match self {
            Self::Query => Arc::new(ServiceInitialState::new(service)),
            Self::AssumeFollowing => Arc::new(AssumedInitialState(true)),
            Self::AssumeNotFollowing => Arc::new(AssumedInitialState(false)),
            Self::Random => Arc::new(RandomInitialState),
        }
    }
}

impl FromStr for InitialStateStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "query" | "service" => Ok(Self::Query),
            "assume-following" | "following" => Ok(Self::AssumeFollowing),
            "assume-not-following" | "not-following" => Ok(Self::AssumeNotFollowing),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown initial state strategy '{other}'")),
        }
    }
}

impl fmt::Display for InitialStateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Query => "query",
            Self::AssumeFollowing => "assume-following",
            Self::AssumeNotFollowing => "assume-not-following",
            Self::Random => "random",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceOptions;
    use storage::Storage;

    #[test]
    fn parses_strategy_names() {
        assert_eq!(
            "Query".parse::<InitialStateStrategy>(),
            Ok(InitialStateStrategy::Query)
        );
        assert_eq!(
            "assume-following".parse::<InitialStateStrategy>(),
            Ok(InitialStateStrategy::AssumeFollowing)
        );
        assert!("coin".parse::<InitialStateStrategy>().is_err());
    }

    #[tokio::test]
    async fn query_strategy_reflects_stored_edges() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let service = Arc::new(FollowRelationshipService::new(
            Arc::new(storage),
            ServiceOptions::default(),
        ));
        let (u1, u2) = (UserId::from("u1"), UserId::from("u2"));
        service.follow(&u1, &u2).await.expect("follow");

        let provider = InitialStateStrategy::Query.provider(service);
        assert!(provider.initial_state(&u1, &u2).await.expect("state"));
        assert!(!provider.initial_state(&u2, &u1).await.expect("state"));
    }

    #[tokio::test]
    async fn assumed_strategies_ignore_the_store() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let service = Arc::new(FollowRelationshipService::new(
            Arc::new(storage),
            ServiceOptions::default(),
        ));
        let (u1, u2) = (UserId::from("u1"), UserId::from("u2"));

        let following = InitialStateStrategy::AssumeFollowing.provider(service.clone());
        let not_following = InitialStateStrategy::AssumeNotFollowing.provider(service);
        assert!(following.initial_state(&u1, &u2).await.expect("state"));
        assert!(!not_following.initial_state(&u1, &u2).await.expect("state"));
    }
}
