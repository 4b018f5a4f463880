//! Where per-block messages come from.

use async_trait::async_trait;
use thiserror::Error;
use txflow_core::StreamMessage;

/// Errors a [`MessageSource`] can report.
///
/// "Not found" is not an error: sources return `Ok(None)` for heights that do not
/// exist (skipped blocks), and those are never retried.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport failure (connection refused, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with an unexpected status.
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    /// The message body could not be decoded.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Fetches the message for a single height.
#[async_trait]
pub trait MessageSource: Send + Sync + 'static {
    /// Returns the message at `height`, or `None` if the height was skipped.
    async fn fetch(&self, height: u64) -> Result<Option<StreamMessage>, SourceError>;
}
