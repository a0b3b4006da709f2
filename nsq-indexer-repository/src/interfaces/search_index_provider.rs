//! Search index provider trait definition.
//!
//! This module defines the abstract interface for indexing backend operations,
//! allowing for different backend implementations (OpenSearch, Elasticsearch, mocks).

use async_trait::async_trait;

use crate::errors::SearchIndexError;
use crate::types::{BulkIndexRequest, BulkIndexSummary};

/// Abstracts the underlying indexing backend.
///
/// The batch publisher is the only writer, so implementations need not
/// serialize concurrent bulk calls themselves.
#[async_trait]
pub trait SearchIndexProvider: Send + Sync {
    /// Verify the backend is reachable.
    ///
    /// Called once at startup; an error here means the pipeline has no reason to run.
    async fn check_ready(&self) -> Result<(), SearchIndexError>;

    /// Submit every request in a single bulk call.
    ///
    /// # Returns
    ///
    /// * `Ok(BulkIndexSummary)` - The call was accepted; item-level failures are listed in the summary
    /// * `Err(SearchIndexError)` - The call failed as a whole (network, non-2xx status, unreadable response)
    async fn bulk_index(
        &self,
        requests: &[BulkIndexRequest],
    ) -> Result<BulkIndexSummary, SearchIndexError>;

    /// Release the backend connection. Called last during shutdown.
    async fn close(&self) -> Result<(), SearchIndexError> {
        Ok(())
    }
}
