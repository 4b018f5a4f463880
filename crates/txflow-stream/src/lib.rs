//! txflow-stream: ordered block fetching and run orchestration.
//!
//! # Architecture
//!
//! ```text
//! MessageSource ──► OrderedFetchPipeline ──► MessageFeed
//!                   (W workers, reorder)          │
//!                                                 ▼
//!                         IndexRunner ──► CorrelationEngine ──► Indexer
//!                              │
//!                              └──► CursorStore (height + 1, in range only)
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use txflow_core::{CompletedTransaction, Indexer, IndexerError};
//! use txflow_stream::{HttpMessageSource, RunBuilder};
//!
//! struct Printer;
//!
//! #[async_trait::async_trait]
//! impl Indexer for Printer {
//!     async fn on_completed_transaction(
//!         &mut self,
//!         tx: &CompletedTransaction,
//!     ) -> Result<(), IndexerError> {
//!         println!("{} done, ok={}", tx.hash(), tx.all_receipts_successful());
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpMessageSource::default_for("http://localhost:3030/block")?;
//! let runner = RunBuilder::new()
//!     .id("printer")
//!     .range(9_820_210, Some(9_820_220))
//!     .default_preprocessing()
//!     .build(Arc::new(source))?;
//! let summary = runner.run(&mut Printer).await?;
//! println!("processed {} blocks", summary.processed_blocks);
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod http;
pub mod pipeline;
pub mod runner;
pub mod source;
pub mod telemetry;

pub use builder::RunBuilder;
pub use http::{HttpMessageSource, HttpSourceConfig};
pub use pipeline::{
    MessageFeed, OrderedFetchPipeline, PipelineHandle, PipelineReport, PipelineStats,
    PipelineStatsSnapshot, ReorderBuffer,
};
pub use runner::{IndexRunner, RunSummary};
pub use source::{MessageSource, SourceError};
pub use telemetry::{init_tracing, LogConfig};
