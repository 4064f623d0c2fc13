use crate::migration::bounded::BoundedLog;
use crate::migration::store::{PersistentStore, StoreError};
use crate::models::{FailedItem, ResultRecord};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const RESULTS_KEY: &str = "results";
pub const RESULTS_CAPACITY: usize = 200;
pub const FAILED_ITEMS_KEY: &str = "failedItems";
pub const FAILED_ITEMS_CAPACITY: usize = 50;

/// A capacity-bounded, newest-first collection mirrored to a [`PersistentStore`] on every
/// mutation.
///
/// The mutex is held across the store write so concurrent appends are persisted in the same
/// order they were applied.
pub struct PersistedLog<T> {
    key: &'static str,
    store: Arc<dyn PersistentStore>,
    entries: Mutex<BoundedLog<T>>,
}

pub type ResultsLedger = PersistedLog<ResultRecord>;
pub type FailedItemQueue = PersistedLog<FailedItem>;

impl<T> PersistedLog<T>
where
    T: Serialize + DeserializeOwned + Clone + Send,
{
    pub fn new(key: &'static str, capacity: usize, store: Arc<dyn PersistentStore>) -> Self {
        Self {
            key,
            store,
            entries: Mutex::new(BoundedLog::new(capacity)),
        }
    }

    /// Restores the collection from the store. Called once at startup.
    pub async fn load_all(&self) -> Result<Vec<T>, StoreError> {
        let records: Vec<T> = match self.store.load(self.key).await? {
            Some(text) if !text.trim().is_empty() => serde_json::from_str(&text)?,
            _ => Vec::new(),
        };
        let mut guard = self.entries.lock().await;
        guard.replace(records);
        info!(target = "migrator.store", key = self.key, count = guard.len(), "collection_loaded");
        Ok(guard.to_vec())
    }

    pub async fn append(&self, records: Vec<T>) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut guard = self.entries.lock().await;
        guard.prepend(records);
        self.persist(&guard).await
    }

    pub async fn replace(&self, records: Vec<T>) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().await;
        guard.replace(records);
        self.persist(&guard).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.entries.lock().await;
        guard.clear();
        self.persist(&guard).await
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.entries.lock().await.to_vec()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn persist(&self, log: &BoundedLog<T>) -> Result<(), StoreError> {
        let json = serde_json::to_string(&log.to_vec())?;
        self.store.save(self.key, json).await?;
        debug!(target = "migrator.store", key = self.key, count = log.len(), "collection_saved");
        Ok(())
    }
}

impl PersistedLog<ResultRecord> {
    pub fn open(store: Arc<dyn PersistentStore>) -> Self {
        Self::new(RESULTS_KEY, RESULTS_CAPACITY, store)
    }
}

impl PersistedLog<FailedItem> {
    pub fn open(store: Arc<dyn PersistentStore>) -> Self {
        Self::new(FAILED_ITEMS_KEY, FAILED_ITEMS_CAPACITY, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::store::MemoryStore;
    use crate::models::{ResultStatus, SourceItem};
    use chrono::Utc;

    fn record(id: usize) -> ResultRecord {
        ResultRecord {
            id: id.to_string(),
            name: format!("Item {id}"),
            status: ResultStatus::Success,
            error: None,
            retry_count: 0,
            duration_ms: 5,
            timestamp: Utc::now(),
        }
    }

    fn failed(id: usize) -> FailedItem {
        FailedItem::new(
            SourceItem {
                id: id.to_string(),
                name: format!("Item {id}"),
                price: 1.0,
                description: String::new(),
                weight: None,
                dimensions: None,
                images: vec![],
            },
            "boom",
        )
    }

    #[tokio::test]
    async fn ledger_caps_at_two_hundred_newest_first() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let ledger = ResultsLedger::open(store);
        for id in 0..230 {
            ledger.append(vec![record(id)]).await.unwrap();
        }
        let entries = ledger.snapshot().await;
        assert_eq!(entries.len(), RESULTS_CAPACITY);
        assert_eq!(entries[0].id, "229");
        assert_eq!(entries.last().unwrap().id, "30");
    }

    #[tokio::test]
    async fn failed_queue_caps_at_fifty() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let queue = FailedItemQueue::open(store);
        queue.append((0..80).map(failed).collect()).await.unwrap();
        assert_eq!(queue.snapshot().await.len(), FAILED_ITEMS_CAPACITY);
        assert_eq!(queue.snapshot().await[0].item.id, "0");
    }

    #[tokio::test]
    async fn state_survives_reload_through_the_store() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        {
            let ledger = ResultsLedger::open(store.clone());
            ledger.append(vec![record(1), record(2)]).await.unwrap();
            ledger.append(vec![record(3)]).await.unwrap();
        }
        let reopened = ResultsLedger::open(store.clone());
        assert!(reopened.is_empty().await);
        let loaded = reopened.load_all().await.unwrap();
        let ids: Vec<&str> = loaded.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }

    #[tokio::test]
    async fn load_all_truncates_oversized_documents() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let oversized: Vec<FailedItem> = (0..60).map(failed).collect();
        store
            .save(FAILED_ITEMS_KEY, serde_json::to_string(&oversized).unwrap())
            .await
            .unwrap();
        let queue = FailedItemQueue::open(store);
        assert_eq!(queue.load_all().await.unwrap().len(), FAILED_ITEMS_CAPACITY);
    }

    #[tokio::test]
    async fn clear_persists_an_empty_collection() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        let queue = FailedItemQueue::open(store.clone());
        queue.append(vec![failed(1)]).await.unwrap();
        queue.clear().await.unwrap();
        assert_eq!(
            store.load(FAILED_ITEMS_KEY).await.unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn corrupt_document_is_reported() {
        let store: Arc<dyn PersistentStore> = Arc::new(MemoryStore::new());
        store.save(RESULTS_KEY, "{not json".into()).await.unwrap();
        let ledger = ResultsLedger::open(store);
        assert!(matches!(
            ledger.load_all().await,
            Err(StoreError::Encode(_))
        ));
    }
}
