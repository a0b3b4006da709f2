//! etcd implementation of the coordination store.
//!
//! Keys are namespaced, watches are prefix watches that report previous
//! values, and a lease-based session tracks liveness against the cluster.

mod datastore;
mod session;

pub use datastore::EtcdStore;
pub use session::KeepAliveFailure;
