//! Dependency initialization and wiring for the NSQ indexer.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::settings::{ConnectionMode, Settings};
use crate::consumer::NsqTransport;
use crate::manager::Manager;
use crate::IndexingError;
use nsq_indexer_repository::{OpenSearchProvider, SearchIndexConfig};
use nsq_indexer_store::EtcdStore;

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured manager ready to run.
    pub manager: Manager,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// See [`Settings::from_env`] for the variables read.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexingError)` - If settings are invalid or a connection fails
    pub async fn new() -> Result<Self, IndexingError> {
        Self::from_settings(Settings::from_env()?).await
    }

    /// Connect to the backend and the coordination store and build the manager.
    pub async fn from_settings(settings: Settings) -> Result<Self, IndexingError> {
        info!(
            search_addresses = ?settings.search.addresses,
            etcd_endpoints = ?settings.etcd.endpoints,
            etcd_namespace = %settings.etcd.namespace,
            config_path = %settings.manager.config_path,
            connection_mode = ?settings.connection_mode,
            retry_interval_secs = settings.retry_interval.as_secs(),
            "Initializing dependencies"
        );

        let search_provider = Self::connect_to_opensearch(
            &settings.search,
            settings.connection_mode,
            settings.retry_interval,
        )
        .await?;

        info!(address = %search_provider.address(), "OpenSearch connection established");

        let store = EtcdStore::connect(&settings.etcd)
            .await
            .map_err(|e| IndexingError::config(format!("Failed to connect to etcd: {}", e)))?;

        info!("etcd connection established");

        let manager = Manager::new(
            settings.manager,
            Arc::new(search_provider),
            Arc::new(store),
            Arc::new(NsqTransport::new()),
        );

        Ok(Self { manager })
    }

    /// Connect to OpenSearch with retry logic based on connection mode.
    async fn connect_to_opensearch(
        config: &SearchIndexConfig,
        mode: ConnectionMode,
        retry_interval: Duration,
    ) -> Result<OpenSearchProvider, IndexingError> {
        loop {
            match OpenSearchProvider::connect(config).await {
                Ok(provider) => return Ok(provider),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(IndexingError::config(format!(
                            "Failed to connect to OpenSearch: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            addresses = ?config.addresses,
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to OpenSearch, retrying..."
                        );
                        sleep(retry_interval).await;
                    }
                },
            }
        }
    }
}
