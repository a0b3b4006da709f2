//! Configuration for the etcd coordination store.

use std::time::Duration;

use crate::errors::StoreError;

/// Connection and layout settings for the etcd store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    /// Dial timeout in seconds.
    pub timeout_secs: u64,
    /// Per-request deadline in seconds.
    pub request_timeout_secs: u64,
    /// Lease TTL in seconds for the liveness session.
    pub lease_expire_secs: i64,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    /// Prefix prepended to every key.
    pub namespace: String,
    /// Path of the topic configuration document under the namespace.
    pub path: String,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout_secs: 5,
            request_timeout_secs: 5,
            lease_expire_secs: 5,
            username: String::new(),
            password: String::new(),
            use_tls: false,
            namespace: String::new(),
            path: "dev".to_string(),
        }
    }
}

impl EtcdConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.endpoints.is_empty() {
            return Err(StoreError::config("etcd endpoints can not be empty"));
        }
        if self.use_tls {
            return Err(StoreError::config("etcd tls is not supported"));
        }
        if self.lease_expire_secs <= 0 {
            return Err(StoreError::config("etcd lease expire must be positive"));
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_endpoints() {
        let config = EtcdConfig::default();
        assert!(matches!(config.validate(), Err(StoreError::ConfigError(_))));

        let config = EtcdConfig {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tls() {
        let config = EtcdConfig {
            endpoints: vec!["https://127.0.0.1:2379".to_string()],
            use_tls: true,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StoreError::ConfigError(_))));
    }

    #[test]
    fn test_defaults() {
        let config = EtcdConfig::default();
        assert_eq!(config.path, "dev");
        assert_eq!(config.dial_timeout(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }
}
