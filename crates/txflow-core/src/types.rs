//! Shared types for the streaming pipeline.

use serde::{Deserialize, Serialize};

/// Transaction hash (base58 / hex string as served by the source).
pub type TxHash = String;

/// Receipt identifier.
pub type ReceiptId = String;

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// Header metadata of one streamed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height.
    pub height: u64,
    /// Block hash.
    #[serde(default)]
    pub hash: String,
    /// Parent block hash.
    #[serde(default)]
    pub prev_hash: String,
    /// Block timestamp in nanoseconds since the Unix epoch.
    pub timestamp_nanosec: u64,
}

// ─── Transactions & outcomes ──────────────────────────────────────────────────

/// A transaction as it first appears in a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub signer_id: String,
    pub receiver_id: String,
    /// Receipts the transaction produced when it was converted.
    #[serde(default)]
    pub receipt_ids: Vec<ReceiptId>,
}

/// Result of executing one receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// The execution result is not known to the source.
    Unknown,
    /// Execution failed; carries the error description.
    Failure(String),
    /// Execution succeeded and returned a value.
    SuccessValue(String),
    /// Execution succeeded and delegated its result to another receipt.
    SuccessReceiptId(ReceiptId),
}

impl ExecutionStatus {
    /// Returns the success predicate, with `unknown_default` used for [`Self::Unknown`].
    pub fn is_success(&self, unknown_default: bool) -> bool {
        match self {
            Self::Failure(_) => false,
            Self::SuccessValue(_) | Self::SuccessReceiptId(_) => true,
            Self::Unknown => unknown_default,
        }
    }
}

/// Execution outcome of a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcomeRecord {
    pub receipt_id: ReceiptId,
    pub receiver_id: String,
    pub status: ExecutionStatus,
    /// Follow-on receipts produced by this execution.
    #[serde(default)]
    pub receipt_ids: Vec<ReceiptId>,
    /// Log lines emitted during execution.
    #[serde(default)]
    pub logs: Vec<String>,
}

// ─── Shard / StreamMessage ────────────────────────────────────────────────────

/// One shard's slice of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub shard_id: u64,
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
    #[serde(default)]
    pub receipt_outcomes: Vec<ExecutionOutcomeRecord>,
}

/// Everything the source knows about one block height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub block: BlockHeader,
    #[serde(default)]
    pub shards: Vec<Shard>,
}

impl StreamMessage {
    pub fn height(&self) -> u64 {
        self.block.height
    }

    pub fn timestamp_nanosec(&self) -> u64 {
        self.block.timestamp_nanosec
    }

    /// All transactions, in shard order.
    pub fn transactions(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.shards.iter().flat_map(|s| s.transactions.iter())
    }

    /// All receipt execution outcomes, in shard order.
    pub fn receipt_outcomes(&self) -> impl Iterator<Item = &ExecutionOutcomeRecord> {
        self.shards.iter().flat_map(|s| s.receipt_outcomes.iter())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_success_predicate() {
        assert!(!ExecutionStatus::Failure("panic".into()).is_success(true));
        assert!(ExecutionStatus::SuccessValue(String::new()).is_success(false));
        assert!(ExecutionStatus::SuccessReceiptId("r9".into()).is_success(false));
        assert!(ExecutionStatus::Unknown.is_success(true));
        assert!(!ExecutionStatus::Unknown.is_success(false));
    }

    #[test]
    fn message_iterates_shards_in_order() {
        let tx = |h: &str| TransactionRecord {
            hash: h.into(),
            signer_id: "alice".into(),
            receiver_id: "bob".into(),
            receipt_ids: vec![],
        };
        let msg = StreamMessage {
            block: BlockHeader {
                height: 7,
                hash: "b7".into(),
                prev_hash: "b6".into(),
                timestamp_nanosec: 1,
            },
            shards: vec![
                Shard {
                    shard_id: 0,
                    transactions: vec![tx("t1"), tx("t2")],
                    receipt_outcomes: vec![],
                },
                Shard {
                    shard_id: 1,
                    transactions: vec![tx("t3")],
                    receipt_outcomes: vec![],
                },
            ],
        };
        let hashes: Vec<_> = msg.transactions().map(|t| t.hash.as_str()).collect();
        assert_eq!(hashes, ["t1", "t2", "t3"]);
        assert_eq!(msg.height(), 7);
    }

    #[test]
    fn message_deserializes_from_json() {
        let json = r#"{
            "block": { "height": 100, "timestamp_nanosec": 42 },
            "shards": [{
                "shard_id": 0,
                "receipt_outcomes": [{
                    "receipt_id": "r1",
                    "receiver_id": "bob",
                    "status": { "SuccessValue": "" },
                    "logs": ["EVENT_JSON:{}"]
                }]
            }]
        }"#;
        let msg: StreamMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.height(), 100);
        let outcome = msg.receipt_outcomes().next().unwrap();
        assert_eq!(outcome.status, ExecutionStatus::SuccessValue(String::new()));
        assert!(outcome.receipt_ids.is_empty());
        assert_eq!(msg.transactions().count(), 0);
    }
}
