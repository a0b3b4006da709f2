//! OpenSearch provider implementation.
//!
//! This module provides the concrete implementation of `SearchIndexProvider`
//! using the OpenSearch Rust crate. The bulk API it speaks is shared with
//! Elasticsearch, so the same provider serves both backends.

use async_trait::async_trait;
use opensearch::{
    auth::Credentials,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    BulkOperation, BulkParts, OpenSearch,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::SearchIndexConfig;
use crate::errors::SearchIndexError;
use crate::interfaces::SearchIndexProvider;
use crate::types::{BulkIndexRequest, BulkIndexSummary};

/// OpenSearch provider implementation.
///
/// # Example
///
/// ```ignore
/// use nsq_indexer_repository::{OpenSearchProvider, SearchIndexConfig};
///
/// let config = SearchIndexConfig::new(["http://localhost:9200"]);
/// let provider = OpenSearchProvider::connect(&config).await?;
/// provider.bulk_index(&requests).await?;
/// ```
pub struct OpenSearchProvider {
    client: OpenSearch,
    address: String,
}

impl OpenSearchProvider {
    /// Create a provider for a single node without contacting it.
    ///
    /// # Arguments
    ///
    /// * `address` - Node address; `http://` is assumed when no scheme is given
    /// * `credentials` - Optional basic auth username and password
    pub fn new(address: &str, credentials: Option<(&str, &str)>) -> Result<Self, SearchIndexError> {
        let parsed_url = Self::parse_address(address)?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let mut builder = TransportBuilder::new(conn_pool).disable_proxy();
        if let Some((username, password)) = credentials {
            builder = builder.auth(Credentials::Basic(username.to_string(), password.to_string()));
        }
        let transport = builder
            .build()
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        Ok(Self {
            client: OpenSearch::new(transport),
            address: address.to_string(),
        })
    }

    /// Connect to the first configured address that answers a ping.
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchProvider)` - A provider bound to a reachable node
    /// * `Err(SearchIndexError)` - If no address is configured or none answers
    pub async fn connect(config: &SearchIndexConfig) -> Result<Self, SearchIndexError> {
        if config.addresses.is_empty() {
            return Err(SearchIndexError::connection("no indexing backend addresses configured"));
        }

        let mut last_error = None;
        for address in &config.addresses {
            let provider = match Self::new(address, config.credentials()) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(address = %address, error = %e, "Skipping invalid indexing backend address");
                    last_error = Some(e);
                    continue;
                }
            };

            match provider.check_ready().await {
                Ok(()) => {
                    info!(address = %address, "Connected to indexing backend");
                    return Ok(provider);
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "Indexing backend did not answer ping");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SearchIndexError::connection("no reachable indexing backend")))
    }

    /// Address this provider talks to.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn parse_address(address: &str) -> Result<Url, SearchIndexError> {
        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        Url::parse(&with_scheme).map_err(|e| {
            SearchIndexError::connection(format!("invalid address '{}': {}", address, e))
        })
    }

    fn bulk_body(requests: &[BulkIndexRequest]) -> Vec<BulkOperation<Value>> {
        requests
            .iter()
            .map(|request| {
                BulkOperation::from(
                    BulkOperation::index(Value::Object(request.document.clone()))
                        .index(request.index.clone()),
                )
            })
            .collect()
    }
}

#[async_trait]
impl SearchIndexProvider for OpenSearchProvider {
    async fn check_ready(&self) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .ping()
            .send()
            .await
            .map_err(|e| SearchIndexError::connection(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(SearchIndexError::connection(format!(
                "ping to {} returned status {}",
                self.address, status
            )));
        }
        Ok(())
    }

    /// Index every request with one `_bulk` call.
    ///
    /// Each request becomes one `index` action targeting its own index, so a single
    /// call can span several topics and days.
    async fn bulk_index(
        &self,
        requests: &[BulkIndexRequest],
    ) -> Result<BulkIndexSummary, SearchIndexError> {
        if requests.is_empty() {
            return Ok(BulkIndexSummary::default());
        }

        let response = self
            .client
            .bulk(BulkParts::None)
            .body(Self::bulk_body(requests))
            .send()
            .await
            .map_err(|e| SearchIndexError::bulk_index(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Bulk request failed");
            return Err(SearchIndexError::bulk_index(format!(
                "Bulk request failed with status {}: {}",
                status, error_body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SearchIndexError::parse(e.to_string()))?;
        let summary = BulkIndexSummary::from_response(&body)?;

        debug!(
            total = summary.total,
            failed = summary.failed,
            took_ms = ?summary.took_ms,
            "Bulk request completed"
        );
        Ok(summary)
    }

    async fn close(&self) -> Result<(), SearchIndexError> {
        info!(address = %self.address, "Closing indexing backend client");
        Ok(())
    }
}
