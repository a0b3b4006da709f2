//! Outstanding message handles of one subscription.
//!
//! A transport may only be released once every handle it produced has been
//! finished or requeued: resolving a handle against a stopped NSQ consumer
//! panics inside tokio-nsq. Each handle handed to the publisher carries a
//! guard on the tracker, and the consumer task waits for the count to reach
//! zero before stopping its subscription.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::consumer::envelope::MessageHandle;

/// Counts the handles of one subscription that are not yet resolved.
#[derive(Debug)]
pub struct InFlight {
    count: watch::Sender<usize>,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        let (count, _) = watch::channel(0);
        Arc::new(Self { count })
    }

    /// Wrap `handle` so it counts as outstanding until it is resolved or dropped.
    pub fn track(self: &Arc<Self>, handle: Box<dyn MessageHandle>) -> Box<dyn MessageHandle> {
        self.count.send_modify(|count| *count += 1);
        Box::new(TrackedHandle {
            handle,
            _guard: InFlightGuard(Arc::clone(self)),
        })
    }

    pub fn outstanding(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until every tracked handle has been resolved or dropped.
    pub async fn drained(&self) {
        let mut count = self.count.subscribe();
        // The sender lives in `self`, so the wait only ends at zero.
        let _ = count.wait_for(|count| *count == 0).await;
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// A handle that releases its guard only after the inner handle resolved.
struct TrackedHandle {
    handle: Box<dyn MessageHandle>,
    _guard: InFlightGuard,
}

#[async_trait]
impl MessageHandle for TrackedHandle {
    async fn finish(self: Box<Self>) {
        let Self { handle, _guard } = *self;
        handle.finish().await;
    }

    async fn requeue(self: Box<Self>) {
        let Self { handle, _guard } = *self;
        handle.requeue().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    struct CountingHandle {
        resolved: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandle for CountingHandle {
        async fn finish(self: Box<Self>) {
            self.resolved.fetch_add(1, Ordering::SeqCst);
        }

        async fn requeue(self: Box<Self>) {
            self.resolved.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle(resolved: &Arc<AtomicUsize>) -> Box<dyn MessageHandle> {
        Box::new(CountingHandle {
            resolved: Arc::clone(resolved),
        })
    }

    #[tokio::test]
    async fn test_drained_returns_immediately_when_idle() {
        let in_flight = InFlight::new();
        timeout(Duration::from_secs(1), in_flight.drained())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_drained_waits_for_every_handle() {
        let resolved = Arc::new(AtomicUsize::new(0));
        let in_flight = InFlight::new();
        let first = in_flight.track(handle(&resolved));
        let second = in_flight.track(handle(&resolved));
        assert_eq!(in_flight.outstanding(), 2);

        let waiter = {
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move { in_flight.drained().await })
        };

        first.finish().await;
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        assert_eq!(in_flight.outstanding(), 1);

        second.requeue().await;
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(resolved.load(Ordering::SeqCst), 2);
        assert_eq!(in_flight.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_is_released() {
        let resolved = Arc::new(AtomicUsize::new(0));
        let in_flight = InFlight::new();
        let tracked = in_flight.track(handle(&resolved));

        drop(tracked);

        timeout(Duration::from_secs(1), in_flight.drained())
            .await
            .unwrap();
        assert_eq!(resolved.load(Ordering::SeqCst), 0);
    }
}
