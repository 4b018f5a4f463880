//! Transaction ↔ receipt correlation.
//!
//! A transaction's receipts may execute many blocks after the transaction itself
//! appeared, and each receipt may spawn follow-on receipts. The engine keeps:
//!
//! - an arena of [`OpenTransaction`]s keyed by transaction hash, and
//! - a receipt ownership index (`receipt id → tx hash`) used to attribute outcomes
//!   observed in any later block.
//!
//! A transaction is reported exactly once, when the last receipt it is known to owe
//! resolves. Blocks must be observed in strictly increasing height order: follow-on
//! receipt ids are only registered as they are discovered.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::handler::Indexer;
use crate::types::{
    ExecutionOutcomeRecord, ExecutionStatus, ReceiptId, StreamMessage, TransactionRecord, TxHash,
};
use crate::window::VisibilityFlags;

// ─── Records ──────────────────────────────────────────────────────────────────

/// A receipt outcome attributed to its originating transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedReceipt {
    pub receipt_id: ReceiptId,
    pub receiver_id: String,
    pub status: ExecutionStatus,
    /// Follow-on receipts produced by this execution.
    pub receipt_ids: Vec<ReceiptId>,
    pub logs: Vec<String>,
    /// Height of the block in which the outcome was observed.
    pub block_height: u64,
    pub block_timestamp_nanosec: u64,
    /// Success predicate, with the configured default applied to `Unknown`.
    pub successful: bool,
}

impl ResolvedReceipt {
    fn new(
        outcome: &ExecutionOutcomeRecord,
        message: &StreamMessage,
        unknown_default: bool,
    ) -> Self {
        Self {
            receipt_id: outcome.receipt_id.clone(),
            receiver_id: outcome.receiver_id.clone(),
            status: outcome.status.clone(),
            receipt_ids: outcome.receipt_ids.clone(),
            logs: outcome.logs.clone(),
            block_height: message.height(),
            block_timestamp_nanosec: message.timestamp_nanosec(),
            successful: outcome.status.is_success(unknown_default),
        }
    }
}

/// A transaction that still owes at least one receipt.
#[derive(Debug, Clone)]
pub struct OpenTransaction {
    transaction: TransactionRecord,
    /// Height at which the transaction first appeared.
    started_at: u64,
    /// Every receipt id known to be owed to this transaction.
    known: HashSet<ReceiptId>,
    /// Subset of `known` not yet observed.
    pending: HashSet<ReceiptId>,
    /// Resolved receipts, in resolution order.
    resolved: Vec<ResolvedReceipt>,
}

impl OpenTransaction {
    fn new(transaction: TransactionRecord, started_at: u64) -> Self {
        let known: HashSet<_> = transaction.receipt_ids.iter().cloned().collect();
        Self {
            pending: known.clone(),
            known,
            transaction,
            started_at,
            resolved: Vec::new(),
        }
    }

    pub fn transaction(&self) -> &TransactionRecord {
        &self.transaction
    }

    pub fn hash(&self) -> &str {
        &self.transaction.hash
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Receipts resolved so far, in resolution order.
    pub fn resolved_receipts(&self) -> &[ResolvedReceipt] {
        &self.resolved
    }

    /// Returns `true` if `receipt_id` is still awaited.
    pub fn is_pending(&self, receipt_id: &str) -> bool {
        self.pending.contains(receipt_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Owe `receipt_id` unless it is already known. Returns `true` if it was added.
    fn expect_receipt(&mut self, receipt_id: &ReceiptId) -> bool {
        if self.known.insert(receipt_id.clone()) {
            self.pending.insert(receipt_id.clone());
            true
        } else {
            false
        }
    }

    fn resolve(&mut self, receipt: ResolvedReceipt) {
        self.pending.remove(&receipt.receipt_id);
        self.resolved.push(receipt);
    }

    fn into_completed(self, completed_at: u64) -> CompletedTransaction {
        CompletedTransaction {
            transaction: self.transaction,
            started_at: self.started_at,
            completed_at,
            receipts: self.resolved,
        }
    }
}

/// A transaction whose receipts have all been observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedTransaction {
    pub transaction: TransactionRecord,
    pub started_at: u64,
    /// Height at which the last receipt resolved.
    pub completed_at: u64,
    /// Every receipt of the transaction, in resolution order.
    pub receipts: Vec<ResolvedReceipt>,
}

impl CompletedTransaction {
    pub fn hash(&self) -> &str {
        &self.transaction.hash
    }

    /// `true` only if every receipt succeeded; `Unknown` statuses count as success here.
    pub fn all_receipts_successful(&self) -> bool {
        self.receipts.iter().all(|r| r.status.is_success(true))
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Counters describing what one `observe` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserveReport {
    pub registered: usize,
    pub resolved: usize,
    pub completed: usize,
    pub uncorrelated: usize,
}

/// The correlation state machine.
///
/// Owned by a single driver; no internal locking.
#[derive(Debug, Default)]
pub struct CorrelationEngine {
    open: HashMap<TxHash, OpenTransaction>,
    owners: HashMap<ReceiptId, TxHash>,
    unknown_status_success: bool,
}

impl CorrelationEngine {
    /// Create an engine. `unknown_status_success` is the success predicate used for
    /// receipts whose status is [`ExecutionStatus::Unknown`].
    pub fn new(unknown_status_success: bool) -> Self {
        Self {
            open: HashMap::new(),
            owners: HashMap::new(),
            unknown_status_success,
        }
    }

    /// Number of transactions still waiting for receipts.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_transaction(&self, hash: &str) -> Option<&OpenTransaction> {
        self.open.get(hash)
    }

    /// Owning transaction hash recorded for `receipt_id`, if any.
    pub fn owner_of(&self, receipt_id: &str) -> Option<&TxHash> {
        self.owners.get(receipt_id)
    }

    /// Size of the receipt ownership index.
    pub fn indexed_receipts(&self) -> usize {
        self.owners.len()
    }

    /// Feed one block through the state machine, dispatching callbacks to `indexer`.
    ///
    /// Transactions are handled before receipt outcomes, shards in message order.
    /// The first failing callback aborts the block and is returned.
    pub async fn observe<I>(
        &mut self,
        message: &StreamMessage,
        flags: VisibilityFlags,
        indexer: &mut I,
    ) -> Result<ObserveReport, IndexerError>
    where
        I: Indexer + ?Sized,
    {
        let mut report = ObserveReport::default();

        if flags.emit_raw {
            indexer.on_block(message).await?;
        }

        for tx in message.transactions() {
            if flags.preprocess && self.register_transaction(tx, message.height(), flags) {
                report.registered += 1;
            }
            if flags.emit_raw {
                indexer.on_transaction(tx, message).await?;
            }
        }

        for outcome in message.receipt_outcomes() {
            let owner = if flags.preprocess {
                self.owners
                    .get(&outcome.receipt_id)
                    .filter(|hash| self.open.contains_key(hash.as_str()))
                    .cloned()
            } else {
                None
            };

            match owner {
                Some(hash) => {
                    if self
                        .resolve_receipt(&hash, outcome, message, flags, indexer, &mut report)
                        .await?
                    {
                        report.resolved += 1;
                    }
                }
                None => report.uncorrelated += 1,
            }

            if flags.emit_raw {
                indexer.on_receipt(outcome, message).await?;
            }
        }

        indexer.on_block_end(message).await?;

        tracing::debug!(
            height = message.height(),
            registered = report.registered,
            resolved = report.resolved,
            completed = report.completed,
            open = self.open.len(),
            "block correlated"
        );
        Ok(report)
    }

    /// Index the transaction's initial receipts and, if allowed, open it.
    /// Returns `true` if a new open transaction was created.
    fn register_transaction(
        &mut self,
        tx: &TransactionRecord,
        height: u64,
        flags: VisibilityFlags,
    ) -> bool {
        for receipt_id in &tx.receipt_ids {
            self.owners.insert(receipt_id.clone(), tx.hash.clone());
        }

        if !flags.register_new_transactions {
            return false;
        }
        if tx.receipt_ids.is_empty() {
            tracing::debug!(tx = %tx.hash, "transaction produced no receipts; not tracked");
            return false;
        }
        if self.open.contains_key(&tx.hash) {
            tracing::debug!(tx = %tx.hash, "transaction already open; keeping first sighting");
            return false;
        }

        self.open
            .insert(tx.hash.clone(), OpenTransaction::new(tx.clone(), height));
        true
    }

    /// Attribute `outcome` to the open transaction `hash`.
    /// Returns `false` if the receipt had already been resolved.
    async fn resolve_receipt<I>(
        &mut self,
        hash: &TxHash,
        outcome: &ExecutionOutcomeRecord,
        message: &StreamMessage,
        flags: VisibilityFlags,
        indexer: &mut I,
        report: &mut ObserveReport,
    ) -> Result<bool, IndexerError>
    where
        I: Indexer + ?Sized,
    {
        let Some(open) = self.open.get(hash) else {
            return Ok(false);
        };
        if !open.is_pending(&outcome.receipt_id) {
            tracing::debug!(
                tx = %hash,
                receipt = %outcome.receipt_id,
                "receipt already resolved; ignoring repeat outcome"
            );
            return Ok(false);
        }

        let receipt = ResolvedReceipt::new(outcome, message, self.unknown_status_success);
        if flags.emit_correlated {
            indexer.on_resolved_receipt(&receipt, open).await?;
        }

        let Some(open) = self.open.get_mut(hash) else {
            return Ok(false);
        };
        open.resolve(receipt);
        for follow_on in &outcome.receipt_ids {
            self.owners.insert(follow_on.clone(), hash.clone());
            open.expect_receipt(follow_on);
        }

        if open.is_complete() {
            if let Some(open) = self.open.remove(hash) {
                let completed = open.into_completed(message.height());
                report.completed += 1;
                if flags.emit_correlated {
                    indexer.on_completed_transaction(&completed).await?;
                }
            }
        }
        Ok(true)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
