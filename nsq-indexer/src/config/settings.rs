//! Process settings read from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use nsq_indexer_repository::SearchIndexConfig;
use nsq_indexer_store::EtcdConfig;

use crate::manager::ManagerConfig;
use crate::publisher::PublisherConfig;
use crate::IndexingError;

/// Default OpenSearch/Elasticsearch address.
const DEFAULT_SEARCH_ADDRESS: &str = "http://127.0.0.1:9200";

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_BATCH_TIMEOUT_MS: u64 = 1000;
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1000;

/// Connection mode for the indexing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if the connection fails.
    FailFast,
    /// Retry the connection at a fixed interval until it succeeds.
    Retry,
}

impl ConnectionMode {
    /// Parse a connection mode. Valid values are "fail-fast" and "retry" (case-insensitive).
    fn parse(value: Option<&str>) -> Self {
        match value.map(str::to_lowercase).as_deref() {
            None | Some("fail-fast") | Some("failfast") | Some("fail_fast") => Self::FailFast,
            Some("retry") => Self::Retry,
            Some(other) => {
                warn!(value = %other, "Invalid OPENSEARCH_CONNECTION_MODE, defaulting to 'fail-fast'");
                Self::FailFast
            }
        }
    }
}

/// Everything the indexer needs to start.
#[derive(Debug, Clone)]
pub struct Settings {
    pub search: SearchIndexConfig,
    pub connection_mode: ConnectionMode,
    pub retry_interval: Duration,
    pub etcd: EtcdConfig,
    pub manager: ManagerConfig,
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `OPENSEARCH_ADDRS` / `ELASTICSEARCH_ADDRS`: Comma separated backend addresses (default: http://127.0.0.1:9200)
    /// - `ELASTICSEARCH_USERNAME`, `ELASTICSEARCH_PASSWORD`: Basic auth, used only when the username is set
    /// - `OPENSEARCH_CONNECTION_MODE`: "fail-fast" or "retry" (default: fail-fast)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `ETCD_ENDPOINTS`: Comma separated etcd endpoints (required)
    /// - `ETCD_TIMEOUT_SECS`, `ETCD_REQUEST_TIMEOUT_SECS`, `ETCD_LEASE_EXPIRE_SECS`: (default: 5)
    /// - `ETCD_USERNAME`, `ETCD_PASSWORD`: etcd authentication
    /// - `ETCD_USE_TLS`: TLS is rejected at connect time
    /// - `ETCD_NAMESPACE`: Key prefix (default: empty)
    /// - `ETCD_PATH`: Topic configuration path (default: dev)
    /// - `BATCH_SIZE`: Flush threshold (default: 100)
    /// - `BATCH_TIMEOUT_MS`: Flush interval in milliseconds (default: 1000)
    /// - `CHANNEL_BUFFER_SIZE`: Envelope channel capacity (default: 1000)
    pub fn from_env() -> Result<Self, IndexingError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Read settings through `var`, which returns the value of a variable if it is set.
    pub fn from_vars<F>(var: F) -> Result<Self, IndexingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let search_addresses = list(var("OPENSEARCH_ADDRS").or_else(|| var("ELASTICSEARCH_ADDRS")))
            .unwrap_or_else(|| vec![DEFAULT_SEARCH_ADDRESS.to_string()]);
        let mut search = SearchIndexConfig::new(search_addresses);
        if let Some(username) = var("ELASTICSEARCH_USERNAME").filter(|u| !u.is_empty()) {
            search = search.with_credentials(username, var("ELASTICSEARCH_PASSWORD").unwrap_or_default());
        }

        let connection_mode = ConnectionMode::parse(var("OPENSEARCH_CONNECTION_MODE").as_deref());
        let retry_interval = Duration::from_secs(parse(
            &var,
            "OPENSEARCH_RETRY_INTERVAL_SECS",
            DEFAULT_RETRY_INTERVAL_SECS,
        )?);

        let defaults = EtcdConfig::default();
        let etcd = EtcdConfig {
            endpoints: list(var("ETCD_ENDPOINTS")).unwrap_or_default(),
            timeout_secs: parse(&var, "ETCD_TIMEOUT_SECS", defaults.timeout_secs)?,
            request_timeout_secs: parse(&var, "ETCD_REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            lease_expire_secs: parse(&var, "ETCD_LEASE_EXPIRE_SECS", defaults.lease_expire_secs)?,
            username: var("ETCD_USERNAME").unwrap_or_default(),
            password: var("ETCD_PASSWORD").unwrap_or_default(),
            use_tls: parse(&var, "ETCD_USE_TLS", false)?,
            namespace: var("ETCD_NAMESPACE").unwrap_or_default(),
            path: var("ETCD_PATH")
                .filter(|p| !p.is_empty())
                .unwrap_or(defaults.path),
        };
        if etcd.endpoints.is_empty() {
            return Err(IndexingError::config("ETCD_ENDPOINTS must be set"));
        }

        let manager = ManagerConfig {
            config_path: etcd.path.clone(),
            channel_buffer_size: parse(&var, "CHANNEL_BUFFER_SIZE", DEFAULT_CHANNEL_BUFFER_SIZE)?,
            publisher: PublisherConfig {
                max_batch_size: parse(&var, "BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                flush_interval: Duration::from_millis(parse(
                    &var,
                    "BATCH_TIMEOUT_MS",
                    DEFAULT_BATCH_TIMEOUT_MS,
                )?),
            },
        };

        Ok(Self {
            search,
            connection_mode,
            retry_interval,
            etcd,
            manager,
        })
    }
}

/// Split a comma separated list, dropping blanks. `None` when nothing remains.
fn list(value: Option<String>) -> Option<Vec<String>> {
    let items: Vec<String> = value?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

fn parse<F, T>(var: &F, name: &str, default: T) -> Result<T, IndexingError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e| IndexingError::config(format!("invalid {}='{}': {}", name, value, e))),
        None => Ok(default),
    }
}
