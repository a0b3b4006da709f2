//! Lease-based liveness session against etcd.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etcd_client::Client;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::StoreError;

/// Invoked once when the keepalive loop gives up on the lease.
pub type KeepAliveFailure = Arc<dyn Fn() + Send + Sync>;

pub(crate) fn default_on_keepalive_failure() -> KeepAliveFailure {
    Arc::new(|| warn!("etcd store keepalive failed"))
}

/// A granted lease plus the task that keeps it alive.
pub(crate) struct Session {
    ttl: i64,
    lease_id: AtomicI64,
    living: Arc<AtomicBool>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    on_failure: KeepAliveFailure,
}

impl Session {
    pub(crate) fn new(ttl: i64, on_failure: KeepAliveFailure) -> Self {
        Self {
            ttl,
            lease_id: AtomicI64::new(0),
            living: Arc::new(AtomicBool::new(false)),
            keepalive: Mutex::new(None),
            on_failure,
        }
    }

    pub(crate) fn living(&self) -> bool {
        self.living.load(Ordering::SeqCst)
    }

    pub(crate) fn lease_id(&self) -> i64 {
        self.lease_id.load(Ordering::SeqCst)
    }

    /// Grant a lease and spawn its keepalive loop.
    pub(crate) async fn start(&self, client: &Client) -> Result<(), StoreError> {
        let mut lease = client.lease_client();
        let grant = lease
            .grant(self.ttl, None)
            .await
            .map_err(|e| StoreError::connection(format!("creates new lease failed: {}", e)))?;
        let lease_id = grant.id();

        let (mut keeper, mut stream) = lease
            .keep_alive(lease_id)
            .await
            .map_err(|e| StoreError::connection(format!("keep alive failed: {}", e)))?;

        self.lease_id.store(lease_id, Ordering::SeqCst);
        self.living.store(true, Ordering::SeqCst);
        info!(lease_id = lease_id, ttl_secs = self.ttl, "etcd session started");

        let living = Arc::clone(&self.living);
        let on_failure = Arc::clone(&self.on_failure);
        let interval = Duration::from_secs((self.ttl / 3).max(1) as u64);

        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = keeper.keep_alive().await {
                    error!(lease_id = lease_id, error = %e, "Failed to send lease keepalive");
                    break;
                }
                match stream.message().await {
                    Ok(Some(response)) if response.ttl() > 0 => {
                        debug!(lease_id = lease_id, ttl = response.ttl(), "Lease kept alive");
                    }
                    Ok(Some(_)) => {
                        error!(lease_id = lease_id, "Lease expired");
                        break;
                    }
                    Ok(None) => {
                        error!(lease_id = lease_id, "Lease keepalive stream closed");
                        break;
                    }
                    Err(e) => {
                        error!(lease_id = lease_id, error = %e, "Lease keepalive stream failed");
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
            living.store(false, Ordering::SeqCst);
            error!("failed to keepalive session");
            on_failure();
        });

        if let Ok(mut slot) = self.keepalive.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    /// Stop the keepalive loop and revoke the lease.
    pub(crate) async fn stop(&self, client: &Client) {
        if let Ok(mut slot) = self.keepalive.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        if self.living.swap(false, Ordering::SeqCst) {
            let lease_id = self.lease_id();
            if let Err(e) = client.lease_client().revoke(lease_id).await {
                warn!(lease_id = lease_id, error = %e, "Failed to revoke lease");
            }
        }
    }
}
