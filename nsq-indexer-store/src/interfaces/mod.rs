//! Interface definitions for the coordination store.
//!
//! The manager depends only on `ConfigStore`, so the etcd backend can be
//! swapped for the in-memory store in tests.

mod config_store;

pub use config_store::{ConfigStore, WatchCallback, WatchEvent, WatchEventKind};
pub(crate) use config_store::strip_namespace;
