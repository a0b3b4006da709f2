//! Error types for the NSQ indexer pipeline.

use nsq_indexer_repository::SearchIndexError;
use nsq_indexer_store::StoreError;
use thiserror::Error;

/// Errors that can occur in the consumption and batching pipeline.
#[derive(Error, Debug)]
pub enum IngestError {
    /// A message body is not a JSON object. Never retried.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Failed to reach NSQ, the indexing backend, or the coordination store.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A bulk flush failed; the batch is requeued.
    #[error("Flush error: {0}")]
    FlushError(String),

    /// Channel communication error.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Coordination store error.
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    /// Indexing backend error.
    #[error("Search index error: {0}")]
    SearchIndexError(#[from] SearchIndexError),
}

impl IngestError {
    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a flush error.
    pub fn flush(msg: impl Into<String>) -> Self {
        Self::FlushError(msg.into())
    }
}
