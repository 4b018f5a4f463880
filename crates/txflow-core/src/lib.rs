//! txflow-core: foundation for the receipt-correlating stream indexer.
//!
//! # Architecture
//!
//! ```text
//! IndexRunner (txflow-stream)
//!      ├── WindowPlan         (prefetch / in-range / postfetch classification)
//!      ├── CorrelationEngine  (open transactions, receipt ownership index)
//!      ├── CursorStore        (resume height persistence)
//!      └── Indexer            (user callbacks, fan-out + naming decorators)
//! ```

pub mod config;
pub mod correlation;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod types;
pub mod window;

pub use config::{EndPolicy, Preprocessing, RangeSpec, RunConfig};
pub use correlation::{
    CompletedTransaction, CorrelationEngine, ObserveReport, OpenTransaction, ResolvedReceipt,
};
pub use cursor::{CursorRecord, CursorStore, MemoryCursorStore};
pub use error::IndexerError;
pub use handler::{Indexer, IndexerSet, NamedIndexer};
pub use types::{
    BlockHeader, ExecutionOutcomeRecord, ExecutionStatus, ReceiptId, Shard, StreamMessage,
    TransactionRecord, TxHash,
};
pub use window::{BlockRange, Region, VisibilityFlags, WindowPlan};
