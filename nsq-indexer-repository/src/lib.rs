//! # NSQ Indexer Repository
//!
//! This crate provides traits and implementations for writing documents to the
//! indexing backend. It includes definitions for errors, interfaces, and a
//! concrete bulk implementation for OpenSearch (wire compatible with Elasticsearch).

pub mod config;
pub mod errors;
pub mod interfaces;
pub mod opensearch;
pub mod types;

pub use config::SearchIndexConfig;
pub use errors::SearchIndexError;
pub use interfaces::SearchIndexProvider;
pub use opensearch::OpenSearchProvider;
pub use types::{BulkIndexRequest, BulkIndexSummary, BulkItemFailure};
