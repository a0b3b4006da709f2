//! Error types for the coordination store.

mod store_error;

pub use store_error::StoreError;
