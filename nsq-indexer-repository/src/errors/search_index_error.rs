//! Search index error types.
//!
//! This module defines the unified error type for all indexing backend operations.

use thiserror::Error;

/// Unified errors from indexing backend operations.
///
/// Used by the `SearchIndexProvider` trait. A bulk call either succeeds as a
/// whole or fails with one of these; item-level failures inside a successful
/// call are reported through `BulkIndexSummary` instead.
#[derive(Debug, Clone, Error)]
pub enum SearchIndexError {
    /// Failed to establish connection to the indexing backend.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The bulk request failed as a whole.
    #[error("Bulk index error: {0}")]
    BulkIndexError(String),

    /// Failed to parse response from the indexing backend.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Failed to serialize data for the indexing backend.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl SearchIndexError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a bulk index error.
    pub fn bulk_index(msg: impl Into<String>) -> Self {
        Self::BulkIndexError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::SerializationError(msg.into())
    }
}
