//! Coordination store error types.

use thiserror::Error;

/// Errors from coordination store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("Key not found: {0}")]
    NotFound(String),

    /// A request exceeded its deadline.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Failed to reach the coordination backend.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// A watch is already registered for this prefix.
    #[error("Watch already registered for prefix '{0}'")]
    DuplicateWatch(String),

    /// The watch stream closed or broke.
    #[error("Watch stream error: {0}")]
    WatchStream(String),

    /// The lease session is alive and cannot be restarted.
    #[error("Session is living, can't restart")]
    SessionAlive,

    /// A stored value could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Invalid store configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StoreError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a watch stream error.
    pub fn watch_stream(msg: impl Into<String>) -> Self {
        Self::WatchStream(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::DecodeError(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        Self::ConnectionError(err.to_string())
    }
}
