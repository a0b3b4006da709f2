//! Coordination store trait definition.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::StoreError;

/// Kind of mutation observed under a watched prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// A single change delivered to a watch callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Key with the store namespace stripped.
    pub key: String,
    /// Value before the change, when the backend reports it.
    pub previous: Option<Vec<u8>>,
    /// Value after the change; empty for deletes.
    pub value: Vec<u8>,
}

/// Callback invoked for every change under a watched prefix.
///
/// Runs on the store's delivery task. It must return quickly: decode and hand
/// off, never block.
pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Read a value, then receive change notifications for it.
///
/// Implementations tolerate concurrent use of `get` and an active watch.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Full key for a path, including the store namespace.
    fn key(&self, path: &str) -> String;

    /// Read the value stored at `path`.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<u8>)` - The stored bytes
    /// * `Err(StoreError::NotFound)` - If the key is absent
    /// * `Err(StoreError::Timeout)` - If the read exceeds the request deadline
    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Register `on_change` for every mutation under `prefix`.
    ///
    /// Returns once registration succeeds; events are delivered asynchronously,
    /// in the order the backend emits them. At most one watch may exist per
    /// prefix: a second registration fails with `StoreError::DuplicateWatch`.
    async fn watch(&self, prefix: &str, on_change: WatchCallback) -> Result<(), StoreError>;

    /// Cancel the watch on `prefix`, if any.
    async fn unwatch(&self, prefix: &str);

    /// Whether the liveness lease is currently held.
    fn session_living(&self) -> bool;

    /// Start a new liveness session. Fails with `StoreError::SessionAlive` if the current one still lives.
    async fn restart_session(&self) -> Result<(), StoreError>;

    /// Cancel every watch and release the backend connection.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Strip the store namespace from a raw backend key.
pub(crate) fn strip_namespace(key: &[u8], namespace: &str) -> String {
    let stripped = key.strip_prefix(namespace.as_bytes()).unwrap_or(key);
    String::from_utf8_lossy(stripped).into_owned()
}
