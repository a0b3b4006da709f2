//! # NSQ Indexer Shared
//!
//! This crate defines shared data structures and types used across the NSQ indexer ecosystem.
//! It includes the live topic configuration document, the per-consumer connection settings
//! derived from it, topic set diffing, and index name derivation.

pub mod types;

pub use types::index_name::{index_name, index_name_for_today};
pub use types::topic_config::{ConsumerSettings, TopicConfig, TopicConfigError};
pub use types::topic_diff::TopicDiff;
