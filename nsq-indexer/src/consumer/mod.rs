//! Consumer module for the NSQ indexer.
//!
//! Provides per-topic NSQ subscriptions that decode messages into envelopes
//! for the batch publisher.

mod envelope;
mod in_flight;
mod nsq_transport;
mod topic_consumer;
mod transport;

pub use envelope::{decode_document, Envelope, MessageHandle};
pub use in_flight::InFlight;
pub use nsq_transport::NsqTransport;
pub use topic_consumer::{ConsumerStats, TopicConsumer};
pub use transport::{Delivery, Subscription, Transport};
