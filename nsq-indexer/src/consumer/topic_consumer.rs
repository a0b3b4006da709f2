//! Per-topic consumer.
//!
//! Each running topic owns one subscription and one task that decodes
//! deliveries and forwards them to the shared envelope channel. Forwarding
//! blocks when the channel is full, which stops the task from pulling more
//! deliveries until the publisher catches up.
//!
//! On stop the task first releases its sender, then waits until the
//! publisher has resolved every handle it forwarded, and only then stops the
//! subscription.

use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use nsq_indexer_shared::ConsumerSettings;

use crate::consumer::envelope::{decode_document, Envelope};
use crate::consumer::in_flight::InFlight;
use crate::consumer::transport::{Delivery, Subscription, Transport};
use crate::errors::IngestError;

/// Counters reported when a consumer task ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Deliveries forwarded to the publisher.
    pub forwarded: u64,
    /// Deliveries dropped (finished without indexing) because they did not decode.
    pub malformed: u64,
}

/// A running subscription to one topic.
pub struct TopicConsumer {
    topic: String,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<ConsumerStats>>,
}

impl TopicConsumer {
    /// Subscribe to `topic` and start forwarding its messages to `sender`.
    ///
    /// # Returns
    ///
    /// * `Ok(TopicConsumer)` - The subscription is live
    /// * `Err(IngestError)` - If the transport could not subscribe
    #[instrument(skip(transport, settings, sender))]
    pub async fn start(
        topic: &str,
        transport: &Arc<dyn Transport>,
        settings: &ConsumerSettings,
        sender: mpsc::Sender<Envelope>,
    ) -> Result<Self, IngestError> {
        let subscription = transport.subscribe(topic, settings).await?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(Self::run(topic.to_string(), subscription, sender, stop_rx));

        info!(topic = %topic, channel = %settings.channel, "Topic consumer started");

        Ok(Self {
            topic: topic.to_string(),
            stop_tx: Some(stop_tx),
            task: Some(task),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether `stop` has not been called yet.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stop the subscription and wait for the consumer task to end.
    ///
    /// A delivery that is mid-forward completes first, and the subscription is
    /// only released once every forwarded envelope has been finished or
    /// requeued, so the publisher must keep running meanwhile. Calling `stop`
    /// again is a no-op.
    pub async fn stop(&mut self) -> ConsumerStats {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let Some(task) = self.task.take() else {
            debug!(topic = %self.topic, "Topic consumer already stopped");
            return ConsumerStats::default();
        };

        match task.await {
            Ok(stats) => {
                info!(
                    topic = %self.topic,
                    forwarded = stats.forwarded,
                    malformed = stats.malformed,
                    "Topic consumer stopped"
                );
                stats
            }
            Err(e) => {
                error!(topic = %self.topic, error = %e, "Topic consumer task failed");
                ConsumerStats::default()
            }
        }
    }

    async fn run(
        topic: String,
        mut subscription: Box<dyn Subscription>,
        sender: mpsc::Sender<Envelope>,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        let in_flight = InFlight::new();

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                delivery = subscription.next_delivery() => {
                    let Some(delivery) = delivery else {
                        warn!(topic = %topic, "Subscription ended");
                        break;
                    };
                    if !Self::forward(&topic, delivery, &in_flight, &sender, &mut stats).await {
                        break;
                    }
                }
            }
        }

        drop(sender);
        let outstanding = in_flight.outstanding();
        if outstanding > 0 {
            info!(topic = %topic, outstanding, "Waiting for forwarded messages to be resolved");
        }
        in_flight.drained().await;

        subscription.stop().await;
        stats
    }

    /// Decode one delivery and hand it to the publisher.
    ///
    /// Returns `false` once the publisher has gone away.
    async fn forward(
        topic: &str,
        delivery: Delivery,
        in_flight: &Arc<InFlight>,
        sender: &mpsc::Sender<Envelope>,
        stats: &mut ConsumerStats,
    ) -> bool {
        let Delivery { body, handle } = delivery;
        let handle = in_flight.track(handle);

        let document = match decode_document(&body) {
            Ok(document) => document,
            Err(e) => {
                warn!(topic = %topic, error = %e, body_len = body.len(), "Dropping malformed message");
                stats.malformed += 1;
                handle.finish().await;
                return true;
            }
        };

        let envelope = Envelope::new(topic, document, Local::now().date_naive(), handle);
        match sender.send(envelope).await {
            Ok(()) => {
                stats.forwarded += 1;
                true
            }
            Err(mpsc::error::SendError(envelope)) => {
                error!(topic = %topic, "Publisher channel closed, requeueing message");
                envelope.requeue().await;
                false
            }
        }
    }
}

impl Drop for TopicConsumer {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::envelope::MessageHandle;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct Outcomes {
        finished: Mutex<Vec<u32>>,
        requeued: Mutex<Vec<u32>>,
        after_stop: Mutex<Vec<u32>>,
    }

    /// Mirrors an NSQ message: resolving it after its subscription stopped is an error.
    struct MockHandle {
        id: u32,
        outcomes: Arc<Outcomes>,
        stopped: Arc<Mutex<bool>>,
    }

    impl MockHandle {
        fn resolve(&self, list: &Mutex<Vec<u32>>) {
            if *self.stopped.lock().unwrap() {
                self.outcomes.after_stop.lock().unwrap().push(self.id);
            } else {
                list.lock().unwrap().push(self.id);
            }
        }
    }

    #[async_trait]
    impl MessageHandle for MockHandle {
        async fn finish(self: Box<Self>) {
            self.resolve(&self.outcomes.finished);
        }

        async fn requeue(self: Box<Self>) {
            self.resolve(&self.outcomes.requeued);
        }
    }

    struct MockSubscription {
        deliveries: mpsc::Receiver<Delivery>,
        stopped: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl Subscription for MockSubscription {
        async fn next_delivery(&mut self) -> Option<Delivery> {
            self.deliveries.recv().await
        }

        async fn stop(self: Box<Self>) {
            *self.stopped.lock().unwrap() = true;
        }
    }

    struct MockTransport {
        subscription: Mutex<Option<MockSubscription>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn subscribe(
            &self,
            topic: &str,
            _settings: &ConsumerSettings,
        ) -> Result<Box<dyn Subscription>, IngestError> {
            if self.fail {
                return Err(IngestError::connection(format!("cannot subscribe to {}", topic)));
            }
            let subscription = self.subscription.lock().unwrap().take();
            subscription
                .map(|s| Box::new(s) as Box<dyn Subscription>)
                .ok_or_else(|| IngestError::connection("already subscribed"))
        }
    }

    struct Fixture {
        transport: Arc<dyn Transport>,
        deliveries: mpsc::Sender<Delivery>,
        stopped: Arc<Mutex<bool>>,
        outcomes: Arc<Outcomes>,
    }

    fn fixture() -> Fixture {
        let (deliveries, rx) = mpsc::channel(16);
        let stopped = Arc::new(Mutex::new(false));
        let transport = MockTransport {
            subscription: Mutex::new(Some(MockSubscription {
                deliveries: rx,
                stopped: Arc::clone(&stopped),
            })),
            fail: false,
        };
        Fixture {
            transport: Arc::new(transport),
            deliveries,
            stopped,
            outcomes: Arc::new(Outcomes::default()),
        }
    }

    fn delivery(id: u32, body: &str, fx: &Fixture) -> Delivery {
        Delivery {
            body: body.as_bytes().to_vec(),
            handle: Box::new(MockHandle {
                id,
                outcomes: Arc::clone(&fx.outcomes),
                stopped: Arc::clone(&fx.stopped),
            }),
        }
    }

    #[tokio::test]
    async fn test_forwards_decoded_messages() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(8);
        let mut consumer =
            TopicConsumer::start("orders", &fx.transport, &ConsumerSettings::default(), tx)
                .await
                .unwrap();

        fx.deliveries
            .send(delivery(1, r#"{"id": 1}"#, &fx))
            .await
            .unwrap();

        let envelope = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.topic(), "orders");
        assert_eq!(envelope.document()["id"], serde_json::json!(1));

        // Forwarded messages are resolved by the publisher, not the consumer.
        assert!(fx.outcomes.finished.lock().unwrap().is_empty());
        envelope.finish().await;

        let stats = consumer.stop().await;
        assert_eq!(stats.forwarded, 1);
        assert!(*fx.stopped.lock().unwrap());
        assert_eq!(*fx.outcomes.finished.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_stop_waits_for_forwarded_envelopes() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(8);
        let mut consumer =
            TopicConsumer::start("orders", &fx.transport, &ConsumerSettings::default(), tx)
                .await
                .unwrap();

        fx.deliveries.send(delivery(1, r#"{"n": 1}"#, &fx)).await.unwrap();
        fx.deliveries.send(delivery(2, r#"{"n": 2}"#, &fx)).await.unwrap();
        let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();

        let stopping = tokio::spawn(async move { consumer.stop().await });

        // The consumer releases its sender before it waits.
        assert!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());
        assert!(!*fx.stopped.lock().unwrap());

        first.finish().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());

        second.requeue().await;
        let stats = timeout(Duration::from_secs(5), stopping).await.unwrap().unwrap();

        assert_eq!(stats.forwarded, 2);
        assert!(*fx.stopped.lock().unwrap());
        assert_eq!(*fx.outcomes.finished.lock().unwrap(), vec![1]);
        assert_eq!(*fx.outcomes.requeued.lock().unwrap(), vec![2]);
        assert!(fx.outcomes.after_stop.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_envelopes_do_not_block_stop() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(8);
        let mut consumer =
            TopicConsumer::start("orders", &fx.transport, &ConsumerSettings::default(), tx)
                .await
                .unwrap();

        fx.deliveries.send(delivery(1, r#"{"n": 1}"#, &fx)).await.unwrap();
        let envelope = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        drop(envelope);

        timeout(Duration::from_secs(5), consumer.stop()).await.unwrap();
        assert!(*fx.stopped.lock().unwrap());
    }

    #[tokio::test]
    async fn test_malformed_messages_are_finished_not_forwarded() {
        let fx = fixture();
        let (tx, mut rx) = mpsc::channel(8);
        let mut consumer =
            TopicConsumer::start("orders", &fx.transport, &ConsumerSettings::default(), tx)
                .await
                .unwrap();

        fx.deliveries
            .send(delivery(1, "not json", &fx))
            .await
            .unwrap();
        fx.deliveries
            .send(delivery(2, "[1, 2, 3]", &fx))
            .await
            .unwrap();
        fx.deliveries
            .send(delivery(3, r#"{"ok": true}"#, &fx))
            .await
            .unwrap();

        let envelope = timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.document()["ok"], serde_json::json!(true));
        envelope.finish().await;

        let stats = consumer.stop().await;
        assert_eq!(stats, ConsumerStats { forwarded: 1, malformed: 2 });
        assert_eq!(*fx.outcomes.finished.lock().unwrap(), vec![1, 2, 3]);
        assert!(fx.outcomes.requeued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let fx = fixture();
        let (tx, _rx) = mpsc::channel(8);
        let mut consumer =
            TopicConsumer::start("orders", &fx.transport, &ConsumerSettings::default(), tx)
                .await
                .unwrap();

        assert!(consumer.is_running());
        consumer.stop().await;
        assert!(!consumer.is_running());

        let second = timeout(Duration::from_secs(1), consumer.stop()).await.unwrap();
        assert_eq!(second, ConsumerStats::default());
    }

    #[tokio::test]
    async fn test_closed_channel_requeues_message() {
        let fx = fixture();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let mut consumer =
            TopicConsumer::start("orders", &fx.transport, &ConsumerSettings::default(), tx)
                .await
                .unwrap();

        fx.deliveries
            .send(delivery(7, r#"{"a": 1}"#, &fx))
            .await
            .unwrap();

        timeout(Duration::from_secs(5), async {
            while fx.outcomes.requeued.lock().unwrap().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        consumer.stop().await;
        assert_eq!(*fx.outcomes.requeued.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let transport: Arc<dyn Transport> = Arc::new(MockTransport {
            subscription: Mutex::new(None),
            fail: true,
        });
        let (tx, _rx) = mpsc::channel(8);

        let result =
            TopicConsumer::start("orders", &transport, &ConsumerSettings::default(), tx).await;
        assert!(matches!(result, Err(IngestError::ConnectionError(_))));
    }
}
