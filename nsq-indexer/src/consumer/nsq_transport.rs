//! NSQ implementation of the subscription transport.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_nsq::{
    NSQChannel, NSQConfigShared, NSQConsumer, NSQConsumerConfig, NSQConsumerConfigSources,
    NSQConsumerLookupConfig, NSQMessage, NSQRequeueDelay, NSQTopic,
};
use tracing::{debug, info, instrument, warn};
use url::Url;

use nsq_indexer_shared::ConsumerSettings;

use crate::consumer::envelope::MessageHandle;
use crate::consumer::transport::{Delivery, Subscription, Transport};
use crate::errors::IngestError;

/// Subscribes to topics through nsqlookupd.
#[derive(Debug, Clone, Default)]
pub struct NsqTransport;

impl NsqTransport {
    pub fn new() -> Self {
        Self
    }

    /// Check that at least one lookupd endpoint accepts TCP connections within `dial_timeout`.
    ///
    /// tokio-nsq discovers producers in the background and never reports an
    /// unreachable lookupd, so this check is what makes a bad address a
    /// subscription failure.
    pub async fn check_lookupd_reachable(
        addresses: &[String],
        dial_timeout: Duration,
    ) -> Result<(), IngestError> {
        let mut last_error = String::from("no lookupd addresses configured");

        for address in addresses {
            let (host, port) = match lookupd_host_port(address) {
                Ok(target) => target,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            match timeout(dial_timeout, TcpStream::connect((host.as_str(), port))).await {
                Ok(Ok(_)) => {
                    debug!(address = %address, "lookupd reachable");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(address = %address, error = %e, "lookupd unreachable");
                    last_error = format!("{}: {}", address, e);
                }
                Err(_) => {
                    warn!(address = %address, timeout_secs = dial_timeout.as_secs(), "lookupd dial timed out");
                    last_error = format!("{}: dial timed out", address);
                }
            }
        }

        Err(IngestError::connection(format!(
            "create nsq consumer failed: {}",
            last_error
        )))
    }
}

/// Read and write deadlines for nsqd connections. Zero disables a deadline.
fn socket_timeouts(settings: &ConsumerSettings) -> (Option<Duration>, Option<Duration>) {
    let enabled = |timeout: Duration| (!timeout.is_zero()).then_some(timeout);
    (enabled(settings.read_timeout), enabled(settings.write_timeout))
}

fn consumer_config(
    topic: Arc<NSQTopic>,
    channel: Arc<NSQChannel>,
    settings: &ConsumerSettings,
) -> NSQConsumerConfig {
    let (read_timeout, write_timeout) = socket_timeouts(settings);
    let addresses: HashSet<String> = settings.lookup_addresses.iter().cloned().collect();

    NSQConsumerConfig::new(topic, channel)
        .set_max_in_flight(settings.max_in_flight)
        .set_sources(NSQConsumerConfigSources::Lookup(
            NSQConsumerLookupConfig::new().set_addresses(addresses),
        ))
        .set_shared(
            NSQConfigShared::new()
                .set_read_timeout(read_timeout)
                .set_write_timeout(write_timeout),
        )
}

/// Host and port of a lookupd HTTP address. A missing scheme means `http`.
fn lookupd_host_port(address: &str) -> Result<(String, u16), IngestError> {
    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| IngestError::connection(format!("invalid lookupd address '{}': {}", address, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| IngestError::connection(format!("lookupd address '{}' has no host", address)))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| IngestError::connection(format!("lookupd address '{}' has no port", address)))?;

    Ok((host.to_string(), port))
}

#[async_trait]
impl Transport for NsqTransport {
    #[instrument(skip(self, settings), fields(channel = %settings.channel))]
    async fn subscribe(
        &self,
        topic: &str,
        settings: &ConsumerSettings,
    ) -> Result<Box<dyn Subscription>, IngestError> {
        let nsq_topic = NSQTopic::new(topic)
            .ok_or_else(|| IngestError::connection(format!("invalid nsq topic name '{}'", topic)))?;
        let nsq_channel = NSQChannel::new(settings.channel.as_str()).ok_or_else(|| {
            IngestError::connection(format!("invalid nsq channel name '{}'", settings.channel))
        })?;

        Self::check_lookupd_reachable(&settings.lookup_addresses, settings.dial_timeout).await?;

        let consumer = consumer_config(nsq_topic, nsq_channel, settings).build();

        info!(
            topic = %topic,
            max_in_flight = settings.max_in_flight,
            read_timeout_secs = settings.read_timeout.as_secs(),
            write_timeout_secs = settings.write_timeout.as_secs(),
            lookupd = ?settings.lookup_addresses,
            "Subscribed to nsq topic"
        );

        Ok(Box::new(NsqSubscription {
            topic: topic.to_string(),
            consumer,
        }))
    }
}

struct NsqSubscription {
    topic: String,
    consumer: NSQConsumer,
}

#[async_trait]
impl Subscription for NsqSubscription {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        let mut message = self.consumer.consume_filtered().await?;
        let body = std::mem::take(&mut message.body);
        Some(Delivery {
            body,
            handle: Box::new(NsqMessageHandle(message)),
        })
    }

    async fn stop(self: Box<Self>) {
        let Self { topic, consumer } = *self;
        // Dropping the consumer closes its nsqd connections. Messages still in
        // the client buffer were never handed out and nsqd redelivers them.
        drop(consumer);
        info!(topic = %topic, "nsq consumer stopped");
    }
}

struct NsqMessageHandle(NSQMessage);

#[async_trait]
impl MessageHandle for NsqMessageHandle {
    async fn finish(self: Box<Self>) {
        self.0.finish().await;
    }

    async fn requeue(self: Box<Self>) {
        self.0.requeue(NSQRequeueDelay::DefaultDelay).await;
    }
}
