//! Store and collaborator doubles shared by the unit test suites.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{RecordId, UserId},
    protocol::Notification,
};
use storage::{DocumentStore, EqualityFilter, Fields, Record, RecordPage, DEFAULT_PAGE_SIZE};
use tokio::sync::Notify;

use crate::{
    collaborators::{DocumentUserDirectory, FollowChangeHook, Notifier},
    initial_state::InitialStateProvider,
    service::{FollowRelationshipService, ServiceOptions},
};

/// In-process store with the same paging semantics as the SQLite one. Never
/// waits on anything outside the runtime, so it is safe under paused time.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn count(&self, collection: &str) -> usize {
        self.records
            .lock()
            .expect("lock")
            .iter()
            .filter(|record| record.collection == collection)
            .count()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_record(
        &self,
        collection: &str,
        id: RecordId,
        fields: Fields,
    ) -> Result<Record> {
        let mut records = self.records.lock().expect("lock");
        if records
            .iter()
            .any(|record| record.collection == collection && record.id == id)
        {
            return Err(anyhow!("duplicate record id '{id}'"));
        }
        let record = Record {
            id,
            collection: collection.to_string(),
            fields,
            created_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn query_records(
        &self,
        collection: &str,
        filters: &[EqualityFilter],
    ) -> Result<RecordPage> {
        let records = self.records.lock().expect("lock");
        let matches: Vec<&Record> = records
            .iter()
            .filter(|record| record.collection == collection)
            .filter(|record| {
                filters
                    .iter()
                    .all(|filter| record.str_field(&filter.field) == Some(filter.value.as_str()))
            })
            .collect();
        Ok(RecordPage {
            total: matches.len() as u64,
            documents: matches
                .into_iter()
                .take(DEFAULT_PAGE_SIZE as usize)
                .cloned()
                .collect(),
        })
    }

    async fn delete_record(&self, collection: &str, id: &RecordId) -> Result<()> {
        let mut records = self.records.lock().expect("lock");
        let Some(index) = records
            .iter()
            .position(|record| record.collection == collection && &record.id == id)
        else {
            return Err(anyhow!("record '{id}' not found in '{collection}'"));
        };
        records.remove(index);
        Ok(())
    }

    async fn get_record(&self, collection: &str, id: &RecordId) -> Result<Option<Record>> {
        Ok(self
            .records
            .lock()
            .expect("lock")
            .iter()
            .find(|record| record.collection == collection && &record.id == id)
            .cloned())
    }
}

/// Memory store whose reads and writes can be failed or held on demand.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    hold_reads: AtomicBool,
    hold_writes: AtomicBool,
    write_entered: Notify,
    write_release: Notify,
    queries: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::default(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            hold_reads: AtomicBool::new(false),
            hold_writes: AtomicBool::new(false),
            write_entered: Notify::new(),
            write_release: Notify::new(),
            queries: AtomicUsize::new(0),
        })
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    pub async fn add_user(&self, id: &str, name: &str) {
        let mut fields = Fields::new();
        fields.insert("name".into(), serde_json::Value::String(name.into()));
        self.inner
            .create_record(storage::USERS_COLLECTION, RecordId::from(id), fields)
            .await
            .expect("user");
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Queries never return while set.
    pub fn hold_reads(&self, hold: bool) {
        self.hold_reads.store(hold, Ordering::SeqCst);
    }

    /// Blocks create/delete calls until `release_write` is called.
    pub fn hold_writes(&self, hold: bool) {
        self.hold_writes.store(hold, Ordering::SeqCst);
    }

    pub async fn wait_for_write(&self) {
        self.write_entered.notified().await;
    }

    pub fn release_write(&self) {
        self.write_release.notify_one();
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    async fn before_write(&self) -> Result<()> {
        if self.hold_writes.load(Ordering::SeqCst) {
            self.write_entered.notify_one();
            self.write_release.notified().await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("store rejected the write"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn create_record(
        &self,
        collection: &str,
        id: RecordId,
        fields: Fields,
    ) -> Result<Record> {
        self.before_write().await?;
        self.inner.create_record(collection, id, fields).await
    }

    async fn query_records(
        &self,
        collection: &str,
        filters: &[EqualityFilter],
    ) -> Result<RecordPage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.hold_reads.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("store unreachable"));
        }
        self.inner.query_records(collection, filters).await
    }

    async fn delete_record(&self, collection: &str, id: &RecordId) -> Result<()> {
        self.before_write().await?;
        self.inner.delete_record(collection, id).await
    }

    async fn get_record(&self, collection: &str, id: &RecordId) -> Result<Option<Record>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("store unreachable"));
        }
        self.inner.get_record(collection, id).await
    }
}

pub fn service_over(store: &Arc<FlakyStore>, options: ServiceOptions) -> Arc<FollowRelationshipService> {
    Arc::new(FollowRelationshipService::new(store.clone(), options))
}

pub fn directory_over(store: &Arc<FlakyStore>) -> Arc<DocumentUserDirectory> {
    Arc::new(DocumentUserDirectory::new(store.clone()))
}

/// Answers only after `open` is called.
#[derive(Default)]
pub struct GatedInitialState {
    entered: Notify,
    gate: Notify,
    answer: AtomicBool,
}

impl GatedInitialState {
    pub async fn wait_until_asked(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
        self.gate.notify_one();
    }
}

#[async_trait]
impl InitialStateProvider for GatedInitialState {
    async fn initial_state(&self, _viewer_id: &UserId, _target_id: &UserId) -> Result<bool> {
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(self.answer.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().expect("lock").push(notification);
    }
}

#[derive(Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<bool>>,
    fail: bool,
}

impl RecordingHook {
    pub fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl FollowChangeHook for RecordingHook {
    async fn on_follow_change(&self, is_following: bool) -> Result<()> {
        self.calls.lock().expect("lock").push(is_following);
        if self.fail {
            return Err(anyhow!("hook cache refresh failed"));
        }
        Ok(())
    }
}
