//! Transport abstraction for topic subscriptions.
//!
//! The topic consumer only needs "subscribe to a topic" and "give me the next
//! delivery"; NSQ is one implementation, test doubles are another.

use async_trait::async_trait;
use nsq_indexer_shared::ConsumerSettings;

use crate::consumer::envelope::MessageHandle;
use crate::errors::IngestError;

/// A message as delivered by the transport, not yet acknowledged.
///
/// Deliveries are never auto-acknowledged: the handle decides.
pub struct Delivery {
    pub body: Vec<u8>,
    pub handle: Box<dyn MessageHandle>,
}

/// One live subscription to one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery. `None` means the subscription has ended.
    ///
    /// Must be cancel safe: the consumer drops this future when asked to stop.
    async fn next_delivery(&mut self) -> Option<Delivery>;

    /// Stop accepting deliveries and return once the transport has halted.
    ///
    /// Called only after every handle this subscription produced has been
    /// resolved or dropped; a handle must not be resolved afterwards.
    async fn stop(self: Box<Self>);
}

/// Creates subscriptions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to `topic` under the channel in `settings`.
    ///
    /// # Returns
    ///
    /// * `Ok(Box<dyn Subscription>)` - A live subscription
    /// * `Err(IngestError::ConnectionError)` - If the subscription cannot be created
    ///   or no lookup endpoint is reachable
    async fn subscribe(
        &self,
        topic: &str,
        settings: &ConsumerSettings,
    ) -> Result<Box<dyn Subscription>, IngestError>;
}
