//! Topic configuration types for the NSQ indexer.
//!
//! This module defines the document stored in the coordination store that
//! describes which topics to consume and how to connect to NSQ.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Live topic configuration as stored in the coordination store.
///
/// The document is replaced wholesale on every watch event, never merged
/// field by field. Timeouts are expressed in seconds on the wire.
///
/// # Example
///
/// ```
/// use nsq_indexer_shared::TopicConfig;
///
/// let config: TopicConfig = serde_json::from_str(
///     r#"{"lookupd-http-addresses": ["http://127.0.0.1:4161"], "topics": ["orders"], "channel": "indexer"}"#,
/// ).unwrap();
///
/// assert_eq!(config.topics, vec!["orders".to_string()]);
/// assert_eq!(config.max_in_flight, 200);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct TopicConfig {
    /// nsqlookupd HTTP addresses, in preference order.
    #[serde(rename = "lookupd-http-addresses")]
    pub lookup_addresses: Vec<String>,
    /// Topics to consume. Duplicates are ignored.
    pub topics: Vec<String>,
    /// Channel (consumer group) shared by every topic consumer.
    pub channel: String,
    #[serde(rename = "dial-timeout")]
    pub dial_timeout_secs: u64,
    #[serde(rename = "read-timeout")]
    pub read_timeout_secs: u64,
    #[serde(rename = "write-timeout")]
    pub write_timeout_secs: u64,
    /// Maximum number of unacknowledged messages per consumer.
    ///
    /// Stored documents historically spell the key `max-in-fight`; both spellings are accepted.
    #[serde(rename = "max-in-fight", alias = "max-in-flight")]
    pub max_in_flight: u32,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            lookup_addresses: vec!["http://127.0.0.1:4161".to_string()],
            topics: vec!["dev_test".to_string()],
            channel: "nsq_tool_kit".to_string(),
            dial_timeout_secs: 6,
            read_timeout_secs: 60,
            write_timeout_secs: 5,
            max_in_flight: 200,
        }
    }
}

/// Validation failures for a [`TopicConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicConfigError {
    #[error("channel must not be empty")]
    EmptyChannel,

    #[error("at least one lookupd address is required")]
    NoLookupAddresses,

    #[error("max-in-flight must be greater than zero")]
    ZeroMaxInFlight,
}

impl TopicConfig {
    /// Check that the document can be used to start consumers.
    pub fn validate(&self) -> Result<(), TopicConfigError> {
        if self.channel.trim().is_empty() {
            return Err(TopicConfigError::EmptyChannel);
        }
        if self.lookup_addresses.is_empty() {
            return Err(TopicConfigError::NoLookupAddresses);
        }
        if self.max_in_flight == 0 {
            return Err(TopicConfigError::ZeroMaxInFlight);
        }
        Ok(())
    }

    /// Topics in declaration order with duplicates and blank names removed.
    pub fn unique_topics(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty() && seen.insert(*t))
            .collect()
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Connection settings for consumers started under this configuration.
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            channel: self.channel.clone(),
            lookup_addresses: self.lookup_addresses.clone(),
            dial_timeout: self.dial_timeout(),
            read_timeout: self.read_timeout(),
            write_timeout: self.write_timeout(),
            max_in_flight: self.max_in_flight,
        }
    }
}

/// Connection-level settings handed to a single topic consumer.
///
/// Settings are captured when a consumer starts; later configuration changes
/// only affect consumers created after them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub channel: String,
    pub lookup_addresses: Vec<String>,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_in_flight: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        TopicConfig::default().consumer_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_stored_document() {
        let json = r#"{
            "lookupd-http-addresses": ["http://10.0.0.1:4161", "http://10.0.0.2:4161"],
            "topics": ["orders", "payments"],
            "channel": "indexer",
            "dial-timeout": 3,
            "read-timeout": 30,
            "write-timeout": 2,
            "max-in-fight": 50
        }"#;

        let config: TopicConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.lookup_addresses.len(), 2);
        assert_eq!(config.topics, vec!["orders", "payments"]);
        assert_eq!(config.channel, "indexer");
        assert_eq!(config.dial_timeout(), Duration::from_secs(3));
        assert_eq!(config.read_timeout(), Duration::from_secs(30));
        assert_eq!(config.write_timeout(), Duration::from_secs(2));
        assert_eq!(config.max_in_flight, 50);
    }

    #[test]
    fn test_max_in_flight_alias() {
        let config: TopicConfig =
            serde_json::from_str(r#"{"channel": "c", "max-in-flight": 7}"#).unwrap();
        assert_eq!(config.max_in_flight, 7);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: TopicConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TopicConfig::default());
        assert_eq!(config.channel, "nsq_tool_kit");
        assert_eq!(config.max_in_flight, 200);
    }

    #[test]
    fn test_serialize_uses_stored_key_names() {
        let value = serde_json::to_value(TopicConfig::default()).unwrap();
        assert!(value.get("lookupd-http-addresses").is_some());
        assert!(value.get("max-in-fight").is_some());
        assert!(value.get("dial-timeout").is_some());
    }

    #[test]
    fn test_unique_topics_preserves_order() {
        let config = TopicConfig {
            topics: vec![
                "b".to_string(),
                "a".to_string(),
                "b".to_string(),
                " ".to_string(),
                "c".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(config.unique_topics(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_validate() {
        assert!(TopicConfig::default().validate().is_ok());

        let config = TopicConfig {
            channel: String::new(),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(TopicConfigError::EmptyChannel));

        let config = TopicConfig {
            lookup_addresses: vec![],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(TopicConfigError::NoLookupAddresses));

        let config = TopicConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(TopicConfigError::ZeroMaxInFlight));
    }

    #[test]
    fn test_consumer_settings() {
        let config = TopicConfig {
            channel: "group".to_string(),
            max_in_flight: 10,
            ..Default::default()
        };
        let settings = config.consumer_settings();
        assert_eq!(settings.channel, "group");
        assert_eq!(settings.max_in_flight, 10);
        assert_eq!(settings.dial_timeout, Duration::from_secs(6));
        assert_eq!(settings.lookup_addresses, config.lookup_addresses);
    }
}
