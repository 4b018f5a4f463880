//! Error types for the txflow pipeline.

use thiserror::Error;

/// Errors that can occur while running an indexer.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Cursor error: {0}")]
    Cursor(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Shorthand for a [`IndexerError::Handler`] failure.
    pub fn handler(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error was raised by user indexer code.
    pub fn is_handler(&self) -> bool {
        matches!(self, Self::Handler { .. })
    }
}
