//! txflow-storage: persistent resume-cursor backends.
//!
//! Backends:
//! - [`file`]: one JSON file per indexer, atomic rename on save
//! - [`sqlite`]: SQLite via `sqlx` (feature `sqlite`)
//!
//! The in-memory store lives in `txflow-core` as [`txflow_core::MemoryCursorStore`].

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "file")]
pub use file::JsonFileCursorStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;
