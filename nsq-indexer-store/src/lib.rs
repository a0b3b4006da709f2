//! # NSQ Indexer Store
//!
//! This crate abstracts the coordination store that holds the live topic
//! configuration: read a value, then receive a stream of change notifications
//! for it. It includes the `ConfigStore` trait, an etcd implementation, an
//! in-memory implementation for tests and local development, and a typed
//! accessor for the topic configuration document.

pub mod config;
pub mod errors;
pub mod etcd;
pub mod interfaces;
pub mod memory;
pub mod topic_store;

pub use config::EtcdConfig;
pub use errors::StoreError;
pub use etcd::EtcdStore;
pub use interfaces::{ConfigStore, WatchCallback, WatchEvent, WatchEventKind};
pub use memory::InMemoryStore;
pub use topic_store::TopicConfigStore;
