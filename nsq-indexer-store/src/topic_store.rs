//! Typed access to the topic configuration document.

use std::sync::Arc;

use nsq_indexer_shared::TopicConfig;

use crate::errors::StoreError;
use crate::interfaces::ConfigStore;

/// Reads and decodes the `TopicConfig` stored at `/{path}`.
#[derive(Clone)]
pub struct TopicConfigStore {
    store: Arc<dyn ConfigStore>,
}

impl TopicConfigStore {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    /// Key of the configuration document for `path`, without the store namespace.
    ///
    /// Watch events carry keys in this form, so the manager compares against it.
    pub fn key(path: &str) -> String {
        format!("/{}", path)
    }

    /// Fetch and decode the configuration stored for `path`.
    pub async fn get(&self, path: &str) -> Result<TopicConfig, StoreError> {
        let bytes = self.store.get(&Self::key(path)).await?;
        Self::decode(&bytes)
    }

    /// Decode a stored configuration document.
    pub fn decode(bytes: &[u8]) -> Result<TopicConfig, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| {
            StoreError::decode(format!("unmarshal to nsq options struct failed: {}", e))
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[test]
    fn test_key() {
        assert_eq!(TopicConfigStore::key("dev"), "/dev");
    }

    #[tokio::test]
    async fn test_get_decodes_document() {
        let store = Arc::new(InMemoryStore::with_namespace("/nsq"));
        store.put(
            "/dev",
            br#"{"topics": ["orders", "payments"], "channel": "indexer"}"#.to_vec(),
        );

        let topics = TopicConfigStore::new(store);
        let config = topics.get("dev").await.unwrap();
        assert_eq!(config.topics, vec!["orders", "payments"]);
        assert_eq!(config.channel, "indexer");
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let topics = TopicConfigStore::new(Arc::new(InMemoryStore::new()));
        let result = topics.get("dev").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_decode_invalid_document() {
        let result = TopicConfigStore::decode(b"not json");
        assert!(matches!(result, Err(StoreError::DecodeError(_))));
    }
}
