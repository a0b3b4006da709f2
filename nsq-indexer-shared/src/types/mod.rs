//! This module defines the core data structures and types used across the NSQ indexer.
//! It re-exports specific types like `TopicConfig` and `TopicDiff`.

pub mod index_name;
pub mod topic_config;
pub mod topic_diff;

pub use topic_config::{ConsumerSettings, TopicConfig};
pub use topic_diff::TopicDiff;
