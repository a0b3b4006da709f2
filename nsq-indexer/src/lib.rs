//! # NSQ Indexer
//!
//! Consumes a dynamically configured set of NSQ topics and bulk-indexes every
//! message into OpenSearch/Elasticsearch, one index per topic per day.
//!
//! ## Architecture
//!
//! 1. **Consumer**: One subscription per topic, decoding messages into envelopes
//! 2. **Publisher**: Batches envelopes and writes them with the bulk API
//! 3. **Manager**: Keeps the running topics equal to the list stored in etcd
//!
//! ## Modules
//!
//! - [`config`]: Settings and dependency initialization
//! - [`consumer`]: NSQ topic consumers
//! - [`publisher`]: Batching and bulk indexing
//! - [`manager`]: Topic reconciliation and lifecycle
//! - [`errors`]: Error types for the indexer

pub mod config;
pub mod consumer;
pub mod errors;
pub mod manager;
pub mod publisher;

pub use config::{Dependencies, Settings};
pub use errors::IngestError;
pub use manager::{Manager, ManagerConfig};

use thiserror::Error;
use tracing::info;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Ingest error.
    #[error("Ingest error: {0}")]
    IngestError(#[from] IngestError),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Run the manager until the process receives Ctrl-C.
pub async fn run(deps: &mut Dependencies) -> Result<(), IndexingError> {
    let stats = deps.manager.run(shutdown_signal()).await?;
    info!(
        batches_flushed = stats.batches_flushed,
        batches_failed = stats.batches_failed,
        "Shutdown complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
