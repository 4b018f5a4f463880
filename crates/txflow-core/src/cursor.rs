//! Resume cursor. Persists the next height to process for crash recovery.
//!
//! On restart, an auto-continuing run starts from the saved height instead of its
//! configured default. The runner never saves heights from the prefetch or postfetch
//! regions, so a restarted run re-examines the postfetch tail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::IndexerError;

/// A persisted resume position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRecord {
    /// Indexer the cursor belongs to.
    pub indexer_id: String,
    /// First height a resumed run should process.
    pub next_height: u64,
    /// Unix timestamp of when this cursor was saved.
    pub updated_at: i64,
}

impl CursorRecord {
    pub fn new(indexer_id: impl Into<String>, next_height: u64) -> Self {
        Self {
            indexer_id: indexer_id.into(),
            next_height,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trait for loading and saving the resume cursor of one indexer.
///
/// Implementations include [`MemoryCursorStore`] and the file / SQLite stores of
/// `txflow-storage`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the saved next height (`None` if nothing was saved yet).
    async fn load(&self) -> Result<Option<u64>, IndexerError>;

    /// Save (overwrite) the next height.
    async fn save(&self, next_height: u64) -> Result<(), IndexerError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory cursor store for tests and ephemeral indexers.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    indexer_id: String,
    record: Mutex<Option<CursorRecord>>,
    history: Mutex<Vec<u64>>,
}

impl MemoryCursorStore {
    pub fn new(indexer_id: impl Into<String>) -> Self {
        Self {
            indexer_id: indexer_id.into(),
            ..Default::default()
        }
    }

    /// Start from an already-saved cursor.
    pub fn with_height(indexer_id: impl Into<String>, next_height: u64) -> Self {
        let store = Self::new(indexer_id);
        *store.record.lock().unwrap() = Some(CursorRecord::new(&store.indexer_id, next_height));
        store
    }

    /// The current record, if any.
    pub fn record(&self) -> Option<CursorRecord> {
        self.record.lock().unwrap().clone()
    }

    /// Every height saved through this store, in save order.
    pub fn history(&self) -> Vec<u64> {
        self.history.lock().unwrap().clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.record.lock().unwrap().as_ref().map(|r| r.next_height))
    }

    async fn save(&self, next_height: u64) -> Result<(), IndexerError> {
        *self.record.lock().unwrap() = Some(CursorRecord::new(&self.indexer_id, next_height));
        self.history.lock().unwrap().push(next_height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCursorStore::new("my-indexer");
        assert!(store.load().await.unwrap().is_none());

        store.save(1_000).await.unwrap();
        store.save(1_001).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(1_001));
        assert_eq!(store.history(), vec![1_000, 1_001]);
        assert_eq!(store.record().unwrap().indexer_id, "my-indexer");
    }

    #[tokio::test]
    async fn preloaded_store() {
        let store = MemoryCursorStore::with_height("idx", 42);
        assert_eq!(store.load().await.unwrap(), Some(42));
        assert!(store.history().is_empty());
    }
}
