//! Persisted click history and the service gluing storage to fan-out.
//!
//! The backing store lives outside this subsystem; [`HistoryStore`] is the
//! interface it must offer. [`HistoryService`] is what the rest of the
//! application calls when a link is created, clicked, or deleted.

use crate::gateway::Gateway;
use crate::ident::{IdentityError, IdentityGenerator};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shortwave_protocol::ClickEntry;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// History storage errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// No record exists under the given history id.
    #[error("history record not found: {0}")]
    RecordNotFound(String),

    /// A record already exists under the given history id.
    #[error("history id already taken: {0}")]
    DuplicateId(String),

    /// Id minting failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// One shortened link's click log. Entries are kept newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Globally unique, immutable history id; doubles as the channel name.
    pub id: String,
    /// The shortened link this record belongs to.
    pub short_id: String,
    /// Recorded clicks, newest first.
    pub clicks: Vec<ClickEntry>,
}

impl HistoryRecord {
    /// Create an empty record.
    #[must_use]
    pub fn new(id: impl Into<String>, short_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            short_id: short_id.into(),
            clicks: Vec::new(),
        }
    }
}

/// Storage consumed by the fan-out core.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Prepend an entry to a record's click log.
    ///
    /// # Errors
    ///
    /// Fails with [`HistoryError::RecordNotFound`] if the id is unknown.
    async fn append(&self, history_id: &str, entry: ClickEntry) -> Result<(), HistoryError>;

    /// Look a record up by its history id.
    async fn find(&self, history_id: &str) -> Result<Option<HistoryRecord>, HistoryError>;

    /// Resolve a short-link id to its history id.
    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<String>, HistoryError>;

    /// Check whether a history id is taken.
    async fn id_exists(&self, id: &str) -> Result<bool, HistoryError>;

    /// Store a new record.
    ///
    /// # Errors
    ///
    /// Fails with [`HistoryError::DuplicateId`] if the id is taken.
    async fn insert(&self, record: HistoryRecord) -> Result<(), HistoryError>;

    /// Remove a record.
    ///
    /// # Errors
    ///
    /// Fails with [`HistoryError::RecordNotFound`] if the id is unknown.
    async fn delete(&self, history_id: &str) -> Result<(), HistoryError>;
}

/// In-process store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: DashMap<String, HistoryRecord>,
    short_ids: DashMap<String, String>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, history_id: &str, entry: ClickEntry) -> Result<(), HistoryError> {
        let mut record = self
            .records
            .get_mut(history_id)
            .ok_or_else(|| HistoryError::RecordNotFound(history_id.to_string()))?;
        record.clicks.insert(0, entry);
        Ok(())
    }

    async fn find(&self, history_id: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        Ok(self
            .records
            .get(history_id)
            .map(|record| record.value().clone()))
    }

    async fn find_by_short_id(&self, short_id: &str) -> Result<Option<String>, HistoryError> {
        Ok(self.short_ids.get(short_id).map(|id| id.value().clone()))
    }

    async fn id_exists(&self, id: &str) -> Result<bool, HistoryError> {
        Ok(self.records.contains_key(id))
    }

    async fn insert(&self, record: HistoryRecord) -> Result<(), HistoryError> {
        if self.records.contains_key(&record.id) {
            return Err(HistoryError::DuplicateId(record.id.clone()));
        }
        self.short_ids
            .insert(record.short_id.clone(), record.id.clone());
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, history_id: &str) -> Result<(), HistoryError> {
        let (_, record) = self
            .records
            .remove(history_id)
            .ok_or_else(|| HistoryError::RecordNotFound(history_id.to_string()))?;
        self.short_ids.remove(&record.short_id);
        Ok(())
    }
}

/// Records clicks and fans them out to live viewers.
pub struct HistoryService {
    store: Arc<dyn HistoryStore>,
    gateway: Arc<Gateway>,
    ids: IdentityGenerator,
}

impl HistoryService {
    /// Create a service over a store and the channel registry.
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>, gateway: Arc<Gateway>) -> Self {
        Self {
            store,
            gateway,
            ids: IdentityGenerator::default(),
        }
    }

    /// Create the history record backing a freshly shortened link.
    ///
    /// The record id is minted with check-and-retry against the store, so it
    /// is unique at creation and never changes afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the id space is exhausted or the insert fails.
    pub async fn create_record(&self, short_id: &str) -> Result<HistoryRecord, HistoryError> {
        let store = Arc::clone(&self.store);
        let id = self
            .ids
            .create_unique(move |candidate| {
                let store = Arc::clone(&store);
                // A store failure counts as a collision so the id is never
                // handed out unverified
                async move { store.id_exists(&candidate).await.unwrap_or(true) }
            })
            .await?;

        let record = HistoryRecord::new(id, short_id);
        self.store.insert(record.clone()).await?;

        info!(history = %record.id, short = %short_id, "Created click history record");
        Ok(record)
    }

    /// Persist a click and notify every subscriber of the record's channel.
    ///
    /// Returns how many connections received the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the history id is unknown.
    pub async fn record_click(
        &self,
        history_id: &str,
        entry: ClickEntry,
    ) -> Result<usize, HistoryError> {
        self.store.append(history_id, entry.clone()).await?;
        let delivered = self.gateway.publish(history_id, entry);

        debug!(history = %history_id, recipients = delivered, "Recorded click");
        Ok(delivered)
    }

    /// Fetch a record by its history id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn history(&self, history_id: &str) -> Result<Option<HistoryRecord>, HistoryError> {
        self.store.find(history_id).await
    }

    /// Resolve a short-link id to its history id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn resolve_short_id(&self, short_id: &str) -> Result<Option<String>, HistoryError> {
        self.store.find_by_short_id(short_id).await
    }

    /// Drop a record when its owning link is deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the history id is unknown.
    pub async fn delete_record(&self, history_id: &str) -> Result<(), HistoryError> {
        self.store.delete(history_id).await?;
        info!(history = %history_id, "Deleted click history record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, SubscriberHandle};
    use shortwave_protocol::ServerMessage;
    use tokio::sync::mpsc;

    fn entry(ip: &str) -> ClickEntry {
        ClickEntry::new(1_700_000_000_000, ip)
    }

    #[tokio::test]
    async fn append_keeps_newest_first() {
        let store = MemoryHistoryStore::new();
        store
            .insert(HistoryRecord::new("hist01", "abc123"))
            .await
            .unwrap();

        store.append("hist01", entry("198.51.100.1")).await.unwrap();
        store.append("hist01", entry("198.51.100.2")).await.unwrap();

        let record = store.find("hist01").await.unwrap().unwrap();
        assert_eq!(record.clicks.len(), 2);
        assert_eq!(record.clicks[0].ip, "198.51.100.2");
        assert_eq!(record.clicks[1].ip, "198.51.100.1");
    }

    #[tokio::test]
    async fn append_to_an_unknown_record_fails() {
        let store = MemoryHistoryStore::new();
        assert!(matches!(
            store.append("missing", entry("198.51.100.1")).await,
            Err(HistoryError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryHistoryStore::new();
        store
            .insert(HistoryRecord::new("hist01", "abc123"))
            .await
            .unwrap();
        assert!(matches!(
            store.insert(HistoryRecord::new("hist01", "other")).await,
            Err(HistoryError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_the_short_id_index_too() {
        let store = MemoryHistoryStore::new();
        store
            .insert(HistoryRecord::new("hist01", "abc123"))
            .await
            .unwrap();
        assert_eq!(
            store.find_by_short_id("abc123").await.unwrap(),
            Some("hist01".to_string())
        );

        store.delete("hist01").await.unwrap();
        assert_eq!(store.find_by_short_id("abc123").await.unwrap(), None);
        assert!(!store.id_exists("hist01").await.unwrap());
    }

    #[tokio::test]
    async fn created_records_are_unique_and_indexed() {
        let store = Arc::new(MemoryHistoryStore::new());
        let service = HistoryService::new(store.clone(), Arc::new(Gateway::new()));

        let first = service.create_record("abc123").await.unwrap();
        let second = service.create_record("xyz789").await.unwrap();

        assert_ne!(first.id, second.id);
        assert!(store.id_exists(&first.id).await.unwrap());
        assert_eq!(
            service.resolve_short_id("xyz789").await.unwrap(),
            Some(second.id.clone())
        );
    }

    #[tokio::test]
    async fn record_click_appends_and_fans_out() {
        let gateway = Arc::new(Gateway::new());
        let service = HistoryService::new(Arc::new(MemoryHistoryStore::new()), gateway.clone());
        let record = service.create_record("abc123").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway
            .subscribe(
                &record.id,
                SubscriberHandle::new(ConnectionId::new("viewer-1"), tx),
            )
            .unwrap();

        let click = entry("198.51.100.1");
        let delivered = service.record_click(&record.id, click.clone()).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::Data(click.clone()));

        let stored = service.history(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.clicks, vec![click]);
    }

    #[tokio::test]
    async fn record_click_for_an_unknown_history_fails() {
        let service = HistoryService::new(
            Arc::new(MemoryHistoryStore::new()),
            Arc::new(Gateway::new()),
        );
        assert!(matches!(
            service.record_click("missing", entry("198.51.100.1")).await,
            Err(HistoryError::RecordNotFound(_))
        ));
    }
}
