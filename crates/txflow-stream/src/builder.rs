//! Fluent builder API for creating runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use txflow_stream::RunBuilder;
//!
//! let config = RunBuilder::new()
//!     .id("transfers")
//!     .range(9_820_210, Some(9_820_220))
//!     .preprocessing(100, 100)
//!     .workers(8)
//!     .build_config();
//! ```

use std::sync::Arc;

use txflow_core::{
    CursorStore, EndPolicy, IndexerError, Preprocessing, RangeSpec, RunConfig,
};

use crate::runner::IndexRunner;
use crate::source::MessageSource;

/// Fluent builder for [`RunConfig`] and [`IndexRunner`].
#[derive(Default)]
pub struct RunBuilder {
    config: RunConfig,
    cursor: Option<Arc<dyn CursorStore>>,
}

impl RunBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the indexer ID (used as the cursor key).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Process the fixed range `[start, end)`; `end = None` runs forever.
    pub fn range(mut self, start: u64, end: Option<u64>) -> Self {
        self.config.range = RangeSpec::Fixed { start, end };
        self
    }

    /// Resume from the saved cursor, or `default_start` when there is none.
    pub fn auto_continue(mut self, default_start: u64, end: EndPolicy) -> Self {
        self.config.range = RangeSpec::AutoContinue { default_start, end };
        self
    }

    /// Abort on the first callback failure (default) or log and continue.
    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.config.stop_on_error = stop;
        self
    }

    /// Enable cross-block correlation with the given margins.
    pub fn preprocessing(mut self, prefetch: u64, postfetch: u64) -> Self {
        self.config.preprocessing = Some(Preprocessing { prefetch, postfetch });
        self
    }

    /// Enable cross-block correlation with default margins.
    pub fn default_preprocessing(mut self) -> Self {
        self.config.preprocessing = Some(Preprocessing::default());
        self
    }

    pub fn genesis_height(mut self, height: u64) -> Self {
        self.config.genesis_height = height;
        self
    }

    /// Treat receipts with an unknown status as successful (default `true`).
    pub fn unknown_status_success(mut self, success: bool) -> Self {
        self.config.unknown_status_success = success;
        self
    }

    /// Set the number of concurrent fetch workers.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the delay between fetch retries in milliseconds.
    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    pub fn cursor_store(mut self, store: Arc<dyn CursorStore>) -> Self {
        self.cursor = Some(store);
        self
    }

    /// Build the `RunConfig`.
    pub fn build_config(self) -> RunConfig {
        self.config
    }

    /// Build a validated [`IndexRunner`] reading from `source`.
    pub fn build(self, source: Arc<dyn MessageSource>) -> Result<IndexRunner, IndexerError> {
        let runner = IndexRunner::new(self.config, source)?;
        Ok(match self.cursor {
            Some(store) => runner.with_cursor_store(store),
            None => runner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use txflow_core::{MemoryCursorStore, StreamMessage};

    use crate::source::SourceError;

    struct NoSource;

    #[async_trait]
    impl MessageSource for NoSource {
        async fn fetch(&self, _height: u64) -> Result<Option<StreamMessage>, SourceError> {
            Ok(None)
        }
    }

    #[test]
    fn builder_defaults() {
        let cfg = RunBuilder::new().build_config();
        assert_eq!(cfg.id, "default");
        assert!(cfg.stop_on_error);
        assert!(cfg.preprocessing.is_none());
        assert_eq!(cfg.workers, 16);
    }

    #[test]
    fn builder_custom() {
        let cfg = RunBuilder::new()
            .id("my-indexer")
            .auto_continue(1_000, EndPolicy::Count(50))
            .stop_on_error(false)
            .default_preprocessing()
            .genesis_height(9)
            .unknown_status_success(false)
            .workers(4)
            .retry_delay_ms(250)
            .build_config();

        assert_eq!(cfg.id, "my-indexer");
        assert!(cfg.range.uses_cursor());
        assert!(!cfg.stop_on_error);
        assert_eq!(cfg.margins(), Some((100, 100)));
        assert_eq!(cfg.genesis_height, 9);
        assert!(!cfg.unknown_status_success);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.retry_delay_ms, 250);
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = RunBuilder::new().workers(0).build(Arc::new(NoSource));
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }

    #[tokio::test]
    async fn build_attaches_cursor_store() {
        let store = Arc::new(MemoryCursorStore::with_height("idx", 77));
        let runner = RunBuilder::new()
            .id("idx")
            .auto_continue(0, EndPolicy::Count(3))
            .cursor_store(store)
            .build(Arc::new(NoSource))
            .unwrap();

        let plan = runner.plan().await;
        assert_eq!(plan.fetch_start(), 77);
        assert_eq!(plan.fetch_end(), Some(80));
    }
}
