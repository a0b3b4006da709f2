//! In-memory coordination store for testing and local development.
//!
//! The `InMemoryStore` behaves like the etcd store: keys are namespaced,
//! watches are prefix watches delivered in order on a dedicated task, and a
//! second watch on the same prefix is rejected.
//!
//! # Example
//!
//! ```ignore
//! use nsq_indexer_store::{ConfigStore, InMemoryStore};
//!
//! let store = InMemoryStore::with_namespace("/nsq");
//! store.put("/dev", br#"{"topics": ["orders"]}"#.to_vec());
//!
//! let bytes = store.get("/dev").await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::StoreError;
use crate::interfaces::{strip_namespace, ConfigStore, WatchCallback, WatchEvent, WatchEventKind};

/// Store that keeps every key in memory.
pub struct InMemoryStore {
    namespace: String,
    values: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Full (namespaced) watch prefix -> delivery queue.
    watchers: RwLock<HashMap<String, mpsc::UnboundedSender<WatchEvent>>>,
    session_living: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store without a namespace.
    pub fn new() -> Self {
        Self::with_namespace("")
    }

    /// Create an empty store whose keys are prefixed with `namespace`.
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            values: RwLock::new(BTreeMap::new()),
            watchers: RwLock::new(HashMap::new()),
            session_living: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Set the value at `path` and notify matching watches.
    pub fn put(&self, path: &str, value: impl Into<Vec<u8>>) {
        let key = self.key(path);
        let value = value.into();
        let previous = self
            .values
            .write()
            .map(|mut values| values.insert(key.clone(), value.clone()))
            .unwrap_or_default();

        let event = WatchEvent {
            kind: WatchEventKind::Put,
            key: strip_namespace(key.as_bytes(), &self.namespace),
            previous,
            value,
        };
        self.notify(&key, event);
    }

    /// Remove the value at `path` and notify matching watches.
    pub fn delete(&self, path: &str) {
        let key = self.key(path);
        let previous = self
            .values
            .write()
            .map(|mut values| values.remove(&key))
            .unwrap_or_default();

        if previous.is_some() {
            let event = WatchEvent {
                kind: WatchEventKind::Delete,
                key: strip_namespace(key.as_bytes(), &self.namespace),
                previous,
                value: Vec::new(),
            };
            self.notify(&key, event);
        }
    }

    /// Simulate the liveness lease expiring.
    pub fn expire_session(&self) {
        self.session_living.store(false, Ordering::SeqCst);
    }

    /// Number of registered watches.
    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.watchers.read().map(|w| w.len()).unwrap_or_default()
    }

    fn notify(&self, full_key: &str, event: WatchEvent) {
        let Ok(watchers) = self.watchers.read() else {
            return;
        };
        for (prefix, sender) in watchers.iter() {
            if full_key.starts_with(prefix.as_str()) && sender.send(event.clone()).is_err() {
                debug!(prefix = %prefix, "Watch delivery task has stopped");
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    fn key(&self, path: &str) -> String {
        format!("{}{}", self.namespace, path)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let key = self.key(path);
        let values = self
            .values
            .read()
            .map_err(|_| StoreError::connection("store lock poisoned"))?;
        values.get(&key).cloned().ok_or(StoreError::NotFound(key))
    }

    async fn watch(&self, prefix: &str, on_change: WatchCallback) -> Result<(), StoreError> {
        let full_prefix = self.key(prefix);
        let mut watchers = self
            .watchers
            .write()
            .map_err(|_| StoreError::connection("store lock poisoned"))?;
        if watchers.contains_key(&full_prefix) {
            return Err(StoreError::DuplicateWatch(prefix.to_string()));
        }

        let (sender, mut receiver) = mpsc::unbounded_channel::<WatchEvent>();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                on_change(event);
            }
        });

        watchers.insert(full_prefix, sender);
        Ok(())
    }

    async fn unwatch(&self, prefix: &str) {
        let full_prefix = self.key(prefix);
        if let Ok(mut watchers) = self.watchers.write() {
            watchers.remove(&full_prefix);
        }
    }

    fn session_living(&self) -> bool {
        self.session_living.load(Ordering::SeqCst)
    }

    async fn restart_session(&self) -> Result<(), StoreError> {
        if self.session_living.swap(true, Ordering::SeqCst) {
            return Err(StoreError::SessionAlive);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Ok(mut watchers) = self.watchers.write() {
            watchers.clear();
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
