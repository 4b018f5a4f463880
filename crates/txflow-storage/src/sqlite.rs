//! SQLite cursor store.
//!
//! Keeps the cursors of any number of indexers in one `cursors` table keyed by
//! indexer id. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use txflow_storage::sqlite::SqliteCursorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCursorStore::open("./cursors.db", "transfers").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCursorStore::in_memory("transfers").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use txflow_core::{CursorRecord, CursorStore, IndexerError};

fn db_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Cursor(e.to_string())
}

/// SQLite-backed cursor store for one indexer.
#[derive(Clone)]
pub struct SqliteCursorStore {
    pool: SqlitePool,
    indexer_id: String,
}

impl SqliteCursorStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./cursors.db"`) or a full
    /// SQLite URL (`"sqlite:./cursors.db?mode=rwc"`).
    pub async fn open(path: &str, indexer_id: impl Into<String>) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        Self::with_pool(pool, indexer_id).await
    }

    /// Open an in-memory database. All data is lost when the store is dropped.
    pub async fn in_memory(indexer_id: impl Into<String>) -> Result<Self, IndexerError> {
        // Every connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        Self::with_pool(pool, indexer_id).await
    }

    /// Use an existing pool, creating the schema if needed.
    pub async fn with_pool(
        pool: SqlitePool,
        indexer_id: impl Into<String>,
    ) -> Result<Self, IndexerError> {
        let store = Self {
            pool,
            indexer_id: indexer_id.into(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// A store for another indexer sharing this database.
    pub fn for_indexer(&self, indexer_id: impl Into<String>) -> Self {
        Self {
            pool: self.pool.clone(),
            indexer_id: indexer_id.into(),
        }
    }

    pub fn indexer_id(&self) -> &str {
        &self.indexer_id
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                indexer_id  TEXT    NOT NULL PRIMARY KEY,
                next_height INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Read the full record for this indexer.
    pub async fn record(&self) -> Result<Option<CursorRecord>, IndexerError> {
        let row = sqlx::query(
            "SELECT indexer_id, next_height, updated_at FROM cursors WHERE indexer_id = ?",
        )
        .bind(&self.indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| CursorRecord {
            indexer_id: r.get("indexer_id"),
            next_height: r.get::<i64, _>("next_height") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    /// Forget this indexer's cursor.
    pub async fn delete(&self) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM cursors WHERE indexer_id = ?")
            .bind(&self.indexer_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.record().await?.map(|r| r.next_height))
    }

    async fn save(&self, next_height: u64) -> Result<(), IndexerError> {
        let record = CursorRecord::new(self.indexer_id.clone(), next_height);
        sqlx::query(
            "INSERT OR REPLACE INTO cursors (indexer_id, next_height, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(&record.indexer_id)
        .bind(record.next_height as i64)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(indexer_id = %self.indexer_id, next_height, "cursor saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cursor_roundtrip() {
        let store = SqliteCursorStore::in_memory("test-indexer").await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        store.save(1_000).await.unwrap();
        let record = store.record().await.unwrap().unwrap();
        assert_eq!(record.indexer_id, "test-indexer");
        assert_eq!(record.next_height, 1_000);
        assert!(record.updated_at > 0);
    }

    #[tokio::test]
    async fn cursor_upsert() {
        let store = SqliteCursorStore::in_memory("idx").await.unwrap();
        store.save(100).await.unwrap();
        store.save(200).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn indexers_are_isolated() {
        let alpha = SqliteCursorStore::in_memory("alpha").await.unwrap();
        let beta = alpha.for_indexer("beta");

        alpha.save(10).await.unwrap();
        beta.save(20).await.unwrap();
        assert_eq!(alpha.load().await.unwrap(), Some(10));
        assert_eq!(beta.load().await.unwrap(), Some(20));

        alpha.delete().await.unwrap();
        assert!(alpha.load().await.unwrap().is_none());
        assert_eq!(beta.load().await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_opens() {
        let path = std::env::temp_dir().join(format!("txflow-sqlite-{}.db", std::process::id()));
        let path = path.to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        let store = SqliteCursorStore::open(&path, "idx").await.unwrap();
        store.save(42).await.unwrap();
        drop(store);

        let reopened = SqliteCursorStore::open(&path, "idx").await.unwrap();
        assert_eq!(reopened.load().await.unwrap(), Some(42));
    }
}
