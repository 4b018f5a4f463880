//! The user indexer trait + composition decorators.

use async_trait::async_trait;

use crate::correlation::{CompletedTransaction, OpenTransaction, ResolvedReceipt};
use crate::error::IndexerError;
use crate::types::{ExecutionOutcomeRecord, StreamMessage, TransactionRecord};

/// Trait for user-provided indexing logic.
///
/// Every callback defaults to a no-op, so implementors only override the hooks they
/// care about. Callbacks are awaited one at a time, in block order; the runner does not
/// move to the next height until the current height's callbacks have returned.
#[async_trait]
pub trait Indexer: Send {
    /// Called when a block in the requested range starts.
    async fn on_block(&mut self, _block: &StreamMessage) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Called for each transaction of a block in the requested range.
    async fn on_transaction(
        &mut self,
        _tx: &TransactionRecord,
        _block: &StreamMessage,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Called for each receipt outcome of a block in the requested range.
    async fn on_receipt(
        &mut self,
        _outcome: &ExecutionOutcomeRecord,
        _block: &StreamMessage,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Called when a receipt has been attributed to its (still open) transaction.
    async fn on_resolved_receipt(
        &mut self,
        _receipt: &ResolvedReceipt,
        _tx: &OpenTransaction,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Called once per transaction, when its last outstanding receipt resolves.
    async fn on_completed_transaction(
        &mut self,
        _tx: &CompletedTransaction,
    ) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Called after every observed block, regardless of its region.
    async fn on_block_end(&mut self, _block: &StreamMessage) -> Result<(), IndexerError> {
        Ok(())
    }

    /// Called exactly once when the run ends, even if it was aborted.
    async fn finalize(&mut self) -> Result<(), IndexerError> {
        Ok(())
    }
}

// ─── NamedIndexer ─────────────────────────────────────────────────────────────

/// Wraps an indexer and remaps every failure to [`IndexerError::Handler`] tagged with `name`.
pub struct NamedIndexer<I> {
    name: String,
    inner: I,
}

impl<I: Indexer> NamedIndexer<I> {
    pub fn new(name: impl Into<String>, inner: I) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_inner(self) -> I {
        self.inner
    }

    fn remap(&self, result: Result<(), IndexerError>) -> Result<(), IndexerError> {
        result.map_err(|e| match e {
            // Already attributed further down the stack.
            IndexerError::Handler { .. } => e,
            other => IndexerError::handler(&self.name, other.to_string()),
        })
    }
}

#[async_trait]
impl<I: Indexer> Indexer for NamedIndexer<I> {
    async fn on_block(&mut self, block: &StreamMessage) -> Result<(), IndexerError> {
        let result = self.inner.on_block(block).await;
        self.remap(result)
    }

    async fn on_transaction(
        &mut self,
        tx: &TransactionRecord,
        block: &StreamMessage,
    ) -> Result<(), IndexerError> {
        let result = self.inner.on_transaction(tx, block).await;
        self.remap(result)
    }

    async fn on_receipt(
        &mut self,
        outcome: &ExecutionOutcomeRecord,
        block: &StreamMessage,
    ) -> Result<(), IndexerError> {
        let result = self.inner.on_receipt(outcome, block).await;
        self.remap(result)
    }

    async fn on_resolved_receipt(
        &mut self,
        receipt: &ResolvedReceipt,
        tx: &OpenTransaction,
    ) -> Result<(), IndexerError> {
        let result = self.inner.on_resolved_receipt(receipt, tx).await;
        self.remap(result)
    }

    async fn on_completed_transaction(
        &mut self,
        tx: &CompletedTransaction,
    ) -> Result<(), IndexerError> {
        let result = self.inner.on_completed_transaction(tx).await;
        self.remap(result)
    }

    async fn on_block_end(&mut self, block: &StreamMessage) -> Result<(), IndexerError> {
        let result = self.inner.on_block_end(block).await;
        self.remap(result)
    }

    async fn finalize(&mut self) -> Result<(), IndexerError> {
        let result = self.inner.finalize().await;
        self.remap(result)
    }
}

// ─── IndexerSet ───────────────────────────────────────────────────────────────

/// Fans every callback out to several indexers, in registration order.
///
/// The first failure stops the fan-out for that callback and is returned as-is.
/// `finalize` is the exception: every member is finalized, and the first failure is
/// reported afterwards.
#[derive(Default)]
pub struct IndexerSet {
    indexers: Vec<Box<dyn Indexer>>,
}

impl IndexerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an indexer.
    pub fn push(&mut self, indexer: Box<dyn Indexer>) {
        self.indexers.push(indexer);
    }

    /// Builder-style [`IndexerSet::push`].
    pub fn with(mut self, indexer: impl Indexer + 'static) -> Self {
        self.indexers.push(Box::new(indexer));
        self
    }

    pub fn len(&self) -> usize {
        self.indexers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexers.is_empty()
    }
}

#[async_trait]
impl Indexer for IndexerSet {
    async fn on_block(&mut self, block: &StreamMessage) -> Result<(), IndexerError> {
        for indexer in &mut self.indexers {
            indexer.on_block(block).await?;
        }
        Ok(())
    }

    async fn on_transaction(
        &mut self,
        tx: &TransactionRecord,
        block: &StreamMessage,
    ) -> Result<(), IndexerError> {
        for indexer in &mut self.indexers {
            indexer.on_transaction(tx, block).await?;
        }
        Ok(())
    }

    async fn on_receipt(
        &mut self,
        outcome: &ExecutionOutcomeRecord,
        block: &StreamMessage,
    ) -> Result<(), IndexerError> {
        for indexer in &mut self.indexers {
            indexer.on_receipt(outcome, block).await?;
        }
        Ok(())
    }

    async fn on_resolved_receipt(
        &mut self,
        receipt: &ResolvedReceipt,
        tx: &OpenTransaction,
    ) -> Result<(), IndexerError> {
        for indexer in &mut self.indexers {
            indexer.on_resolved_receipt(receipt, tx).await?;
        }
        Ok(())
    }

    async fn on_completed_transaction(
        &mut self,
        tx: &CompletedTransaction,
    ) -> Result<(), IndexerError> {
        for indexer in &mut self.indexers {
            indexer.on_completed_transaction(tx).await?;
        }
        Ok(())
    }

    async fn on_block_end(&mut self, block: &StreamMessage) -> Result<(), IndexerError> {
        for indexer in &mut self.indexers {
            indexer.on_block_end(block).await?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), IndexerError> {
        let mut first_error = None;
        for indexer in &mut self.indexers {
            if let Err(e) = indexer.finalize().await {
                tracing::warn!(error = %e, "indexer finalize failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockHeader;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl Indexer for Counter {
        async fn on_block_end(&mut self, _b: &StreamMessage) -> Result<(), IndexerError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn finalize(&mut self) -> Result<(), IndexerError> {
            self.0.fetch_add(100, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Indexer for Failing {
        async fn on_block_end(&mut self, _b: &StreamMessage) -> Result<(), IndexerError> {
            Err(IndexerError::Other("boom".into()))
        }

        async fn finalize(&mut self) -> Result<(), IndexerError> {
            Err(IndexerError::Other("flush failed".into()))
        }
    }

    fn dummy_block() -> StreamMessage {
        StreamMessage {
            block: BlockHeader {
                height: 1,
                hash: "b1".into(),
                prev_hash: "b0".into(),
                timestamp_nanosec: 0,
            },
            shards: vec![],
        }
    }

    #[tokio::test]
    async fn default_hooks_are_noops() {
        struct Nothing;
        impl Indexer for Nothing {}

        let mut idx = Nothing;
        let block = dummy_block();
        assert!(idx.on_block(&block).await.is_ok());
        assert!(idx.on_block_end(&block).await.is_ok());
        assert!(idx.finalize().await.is_ok());
    }

    #[tokio::test]
    async fn set_fans_out_in_order_and_stops_on_failure() {
        let first = Arc::new(AtomicU32::new(0));
        let last = Arc::new(AtomicU32::new(0));
        let mut set = IndexerSet::new()
            .with(Counter(first.clone()))
            .with(Failing)
            .with(Counter(last.clone()));
        assert_eq!(set.len(), 3);

        let err = set.on_block_end(&dummy_block()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(first.load(Ordering::Relaxed), 1);
        assert_eq!(last.load(Ordering::Relaxed), 0);

        // finalize reaches everyone even after a failure
        assert!(set.finalize().await.is_err());
        assert_eq!(first.load(Ordering::Relaxed), 101);
        assert_eq!(last.load(Ordering::Relaxed), 100);
    }

    #[tokio::test]
    async fn named_indexer_tags_errors() {
        let mut named = NamedIndexer::new("balances", Failing);
        let err = named.on_block_end(&dummy_block()).await.unwrap_err();
        match err {
            IndexerError::Handler { handler, reason } => {
                assert_eq!(handler, "balances");
                assert_eq!(reason, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // an inner name wins over the outer one
        let mut nested = NamedIndexer::new("outer", NamedIndexer::new("inner", Failing));
        let err = nested.finalize().await.unwrap_err();
        assert!(matches!(err, IndexerError::Handler { handler, .. } if handler == "inner"));
    }
}
