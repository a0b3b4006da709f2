//! Error types for the NSQ indexer repository.
//!
//! This module provides a unified error type for all indexing backend operations.

mod search_index_error;

pub use search_index_error::SearchIndexError;
