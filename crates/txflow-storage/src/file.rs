//! JSON-file cursor store.
//!
//! Keeps one [`CursorRecord`] per file. Saves go to a sibling temp file that is
//! then renamed over the target, so a crash mid-write leaves the previous cursor
//! intact.
//!
//! # Usage
//! ```rust,no_run
//! use txflow_storage::file::JsonFileCursorStore;
//!
//! let store = JsonFileCursorStore::new("./state/transfers.cursor.json", "transfers");
//! ```

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use txflow_core::{CursorRecord, CursorStore, IndexerError};

/// Cursor store persisting to a single JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileCursorStore {
    path: PathBuf,
    indexer_id: String,
}

impl JsonFileCursorStore {
    pub fn new(path: impl Into<PathBuf>, indexer_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            indexer_id: indexer_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full record, if the file exists.
    pub async fn record(&self) -> Result<Option<CursorRecord>, IndexerError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cursor_err(&self.path, e)),
        };
        let record: CursorRecord =
            serde_json::from_slice(&bytes).map_err(|e| cursor_err(&self.path, e))?;

        if record.indexer_id != self.indexer_id {
            return Err(IndexerError::Cursor(format!(
                "{} belongs to indexer '{}', not '{}'",
                self.path.display(),
                record.indexer_id,
                self.indexer_id
            )));
        }
        Ok(Some(record))
    }

    /// Remove the cursor file. Missing files are not an error.
    pub async fn delete(&self) -> Result<(), IndexerError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(cursor_err(&self.path, e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn cursor_err(path: &Path, e: impl std::fmt::Display) -> IndexerError {
    IndexerError::Cursor(format!("{}: {e}", path.display()))
}

#[async_trait]
impl CursorStore for JsonFileCursorStore {
    async fn load(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.record().await?.map(|r| r.next_height))
    }

    async fn save(&self, next_height: u64) -> Result<(), IndexerError> {
        let record = CursorRecord::new(self.indexer_id.clone(), next_height);
        let json = serde_json::to_vec_pretty(&record).map_err(|e| cursor_err(&self.path, e))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| cursor_err(dir, e))?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| cursor_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| cursor_err(&self.path, e))?;

        debug!(indexer_id = %self.indexer_id, next_height, "cursor saved");
        Ok(())
    }
}
