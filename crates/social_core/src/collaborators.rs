//! Side-effecting collaborators the toggle controller talks to.

use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::{DisplayName, RecordId, UserId},
    protocol::Notification,
};
use storage::{DocumentStore, USERS_COLLECTION};
use tracing::info;

/// Name shown when a user record exists but carries no usable name.
pub const UNKNOWN_DISPLAY_NAME: &str = "Unknown";

/// Fire-and-forget user notification (toast).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        info!(
            title = %notification.title,
            description = %notification.description,
            "notification"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayNameLookup {
    Found(DisplayName),
    NotFound,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name(&self, user_id: &UserId) -> anyhow::Result<DisplayNameLookup>;
}

/// Reads display names from the `name` field of user documents.
pub struct DocumentUserDirectory {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl DocumentUserDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            collection: USERS_COLLECTION.into(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

#[async_trait]
impl UserDirectory for DocumentUserDirectory {
    async fn display_name(&self, user_id: &UserId) -> anyhow::Result<DisplayNameLookup> {
        let record = self
            .store
            .get_record(&self.collection, &RecordId::new(user_id.as_str()))
            .await?;
        let Some(record) = record else {
            return Ok(DisplayNameLookup::NotFound);
        };
        let name = record
            .str_field("name")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_DISPLAY_NAME);
        Ok(DisplayNameLookup::Found(DisplayName(name.to_string())))
    }
}

/// Told about confirmed follow transitions so the surrounding application can
/// refresh its own caches. Awaited before a toggle completes.
#[async_trait]
pub trait FollowChangeHook: Send + Sync {
    async fn on_follow_change(&self, is_following: bool) -> anyhow::Result<()>;
}
