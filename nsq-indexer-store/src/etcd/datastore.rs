//! etcd implementation of `ConfigStore`.

use std::collections::HashMap;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, Event, EventType, WatchOptions, Watcher};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::config::EtcdConfig;
use crate::errors::StoreError;
use crate::etcd::session::{default_on_keepalive_failure, KeepAliveFailure, Session};
use crate::interfaces::{strip_namespace, ConfigStore, WatchCallback, WatchEvent, WatchEventKind};

/// A registered watch: the server-side watcher and the task delivering its events.
struct WatchHandle {
    watcher: Watcher,
    task: JoinHandle<()>,
}

impl WatchHandle {
    async fn cancel(mut self) {
        if let Err(e) = self.watcher.cancel().await {
            debug!(error = %e, "Failed to cancel etcd watcher");
        }
        self.task.abort();
    }
}

/// Coordination store backed by etcd.
///
/// Constructed once at process start and handed to the manager.
pub struct EtcdStore {
    client: Client,
    request_timeout: Duration,
    namespace: String,
    session: Session,
    watchers: Mutex<HashMap<String, WatchHandle>>,
}

impl EtcdStore {
    /// Connect to etcd and start the liveness session.
    ///
    /// # Returns
    ///
    /// * `Ok(EtcdStore)` - A connected store with a living session
    /// * `Err(StoreError)` - If the configuration is invalid, the cluster is unreachable,
    ///   or the lease cannot be granted
    pub async fn connect(config: &EtcdConfig) -> Result<Self, StoreError> {
        Self::connect_with_failure_handler(config, default_on_keepalive_failure()).await
    }

    /// Connect with a custom handler invoked when the lease keepalive fails.
    #[instrument(skip(config, on_keepalive_failure), fields(endpoints = ?config.endpoints))]
    pub async fn connect_with_failure_handler(
        config: &EtcdConfig,
        on_keepalive_failure: KeepAliveFailure,
    ) -> Result<Self, StoreError> {
        config.validate()?;

        let mut options = ConnectOptions::new()
            .with_connect_timeout(config.dial_timeout())
            .with_timeout(config.request_timeout());
        if !config.username.is_empty() {
            options = options.with_user(config.username.clone(), config.password.clone());
        }

        let client = timeout(
            config.dial_timeout(),
            Client::connect(&config.endpoints, Some(options)),
        )
        .await
        .map_err(|_| StoreError::connection("timed out connecting to etcd"))??;

        let store = Self {
            client,
            request_timeout: config.request_timeout(),
            namespace: config.namespace.clone(),
            session: Session::new(config.lease_expire_secs, on_keepalive_failure),
            watchers: Mutex::new(HashMap::new()),
        };

        store.session.start(&store.client).await?;

        info!(
            endpoints = ?config.endpoints,
            namespace = %config.namespace,
            "Connected to etcd"
        );
        Ok(store)
    }

    /// Convert a raw etcd event into a `WatchEvent`.
    fn watch_event(event: &Event, namespace: &str) -> Option<WatchEvent> {
        let kv = event.kv()?;
        let kind = match event.event_type() {
            EventType::Put => WatchEventKind::Put,
            EventType::Delete => WatchEventKind::Delete,
        };
        Some(WatchEvent {
            kind,
            key: strip_namespace(kv.key(), namespace),
            previous: event.prev_kv().map(|prev| prev.value().to_vec()),
            value: kv.value().to_vec(),
        })
    }
}

#[async_trait]
impl ConfigStore for EtcdStore {
    fn key(&self, path: &str) -> String {
        format!("{}{}", self.namespace, path)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let key = self.key(path);
        let mut kv = self.client.kv_client();

        let response = timeout(self.request_timeout, kv.get(key.clone(), None))
            .await
            .map_err(|_| StoreError::Timeout(key.clone()))?
            .map_err(|e| StoreError::connection(format!("get key from etcd failed: {}", e)))?;

        response
            .kvs()
            .first()
            .map(|kv| kv.value().to_vec())
            .ok_or(StoreError::NotFound(key))
    }

    #[instrument(skip(self, on_change))]
    async fn watch(&self, prefix: &str, on_change: WatchCallback) -> Result<(), StoreError> {
        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(prefix) {
            return Err(StoreError::DuplicateWatch(prefix.to_string()));
        }

        let full_prefix = self.key(prefix);
        let options = WatchOptions::new().with_prefix().with_prev_key();
        let (watcher, mut stream) = self
            .client
            .watch_client()
            .watch(full_prefix.clone(), Some(options))
            .await?;

        let namespace = self.namespace.clone();
        let watched = full_prefix.clone();
        let task = tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(response)) => {
                        if response.canceled() {
                            warn!(prefix = %watched, "etcd cancelled the watch");
                            break;
                        }
                        for event in response.events() {
                            if let Some(event) = Self::watch_event(event, &namespace) {
                                on_change(event);
                            }
                        }
                    }
                    Ok(None) => {
                        let err = StoreError::watch_stream("stream closed by server");
                        error!(prefix = %watched, error = %err, "Watch stream lost");
                        break;
                    }
                    Err(e) => {
                        let err = StoreError::watch_stream(e.to_string());
                        error!(prefix = %watched, error = %err, "Watch stream lost");
                        break;
                    }
                }
            }
            info!(prefix = %watched, "stop watching");
        });

        watchers.insert(prefix.to_string(), WatchHandle { watcher, task });
        info!(prefix = %full_prefix, "Watch registered");
        Ok(())
    }

    async fn unwatch(&self, prefix: &str) {
        let handle = self.watchers.lock().await.remove(prefix);
        match handle {
            Some(handle) => {
                debug!(prefix = %prefix, "unwatch");
                handle.cancel().await;
            }
            None => debug!(prefix = %prefix, "prefix not watched"),
        }
    }

    fn session_living(&self) -> bool {
        self.session.living()
    }

    async fn restart_session(&self) -> Result<(), StoreError> {
        if self.session.living() {
            return Err(StoreError::SessionAlive);
        }
        self.session.start(&self.client).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let handles: Vec<WatchHandle> = self.watchers.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.cancel().await;
        }
        self.session.stop(&self.client).await;
        info!("etcd store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_empty_endpoints() {
        let result = EtcdStore::connect(&EtcdConfig::default()).await;
        assert!(matches!(result, Err(StoreError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_tls() {
        let config = EtcdConfig {
            endpoints: vec!["https://127.0.0.1:2379".to_string()],
            use_tls: true,
            ..Default::default()
        };
        let result = EtcdStore::connect(&config).await;
        assert!(matches!(result, Err(StoreError::ConfigError(_))));
    }
}
