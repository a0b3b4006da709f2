//! Manager module for the NSQ indexer.
//!
//! Owns the running topic consumers and the batch publisher, and keeps the
//! set of consumers equal to the topic list stored in the coordination
//! store. Configuration changes arrive through a store watch and are applied
//! one at a time on the manager's own task, so the consumer map has a single
//! writer.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use nsq_indexer_repository::SearchIndexProvider;
use nsq_indexer_shared::{TopicConfig, TopicDiff};
use nsq_indexer_store::{ConfigStore, TopicConfigStore, WatchCallback, WatchEvent, WatchEventKind};

use crate::consumer::{Envelope, TopicConsumer, Transport};
use crate::errors::IngestError;
use crate::publisher::{BatchPublisher, PublisherConfig, PublisherStats};

/// Prefix the manager watches, relative to the store namespace.
const WATCH_PREFIX: &str = "";

/// Configuration for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Path of the topic configuration document in the store.
    pub config_path: String,
    /// Capacity of the envelope channel between consumers and the publisher.
    pub channel_buffer_size: usize,
    pub publisher: PublisherConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            config_path: "dev".to_string(),
            channel_buffer_size: 1000,
            publisher: PublisherConfig::default(),
        }
    }
}

/// Coordinates topic consumers, the batch publisher and configuration updates.
pub struct Manager {
    config: ManagerConfig,
    provider: Arc<dyn SearchIndexProvider>,
    topic_store: TopicConfigStore,
    transport: Arc<dyn Transport>,
    topic_config: TopicConfig,
    topics: BTreeMap<String, TopicConsumer>,
    sender: Option<mpsc::Sender<Envelope>>,
    receiver: Option<mpsc::Receiver<Envelope>>,
    publisher: Option<JoinHandle<PublisherStats>>,
    updates_tx: mpsc::UnboundedSender<TopicConfig>,
    updates_rx: mpsc::UnboundedReceiver<TopicConfig>,
    watching: bool,
    stopped: bool,
}

impl Manager {
    /// Create a manager. Nothing is contacted until `initialize`.
    pub fn new(
        config: ManagerConfig,
        provider: Arc<dyn SearchIndexProvider>,
        store: Arc<dyn ConfigStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_buffer_size.max(1));
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        Self {
            config,
            provider,
            topic_store: TopicConfigStore::new(store),
            transport,
            topic_config: TopicConfig::default(),
            topics: BTreeMap::new(),
            sender: Some(sender),
            receiver: Some(receiver),
            publisher: None,
            updates_tx,
            updates_rx,
            watching: false,
            stopped: false,
        }
    }

    /// Verify the backend, load the stored topic configuration and watch it for changes.
    ///
    /// Every failure here is fatal to startup.
    #[instrument(skip(self), fields(config_path = %self.config.config_path))]
    pub async fn initialize(&mut self) -> Result<(), IngestError> {
        self.provider.check_ready().await.map_err(|e| {
            IngestError::connection(format!("indexing backend not ready: {}", e))
        })?;
        info!("Indexing backend is ready");

        let topic_config = self.topic_store.get(&self.config.config_path).await?;
        if let Err(e) = topic_config.validate() {
            warn!(error = %e, "Stored topic configuration is invalid");
        }
        info!(
            topics = ?topic_config.topics,
            channel = %topic_config.channel,
            "Loaded topic configuration"
        );
        self.topic_config = topic_config;

        let callback = Self::watch_callback(&self.config.config_path, self.updates_tx.clone());
        self.topic_store
            .store()
            .watch(WATCH_PREFIX, callback)
            .await?;
        self.watching = true;

        Ok(())
    }

    /// Build the watch callback: only puts on the configuration key that
    /// decode cleanly are forwarded to the manager.
    fn watch_callback(
        config_path: &str,
        updates: mpsc::UnboundedSender<TopicConfig>,
    ) -> WatchCallback {
        let config_key = TopicConfigStore::key(config_path);
        Arc::new(move |event: WatchEvent| {
            if event.key != config_key {
                debug!(key = %event.key, "Ignoring change to unrelated key");
                return;
            }
            if event.kind == WatchEventKind::Delete {
                warn!(key = %event.key, "Topic configuration deleted, keeping current topics");
                return;
            }

            let topic_config = match TopicConfigStore::decode(&event.value) {
                Ok(config) => config,
                Err(e) => {
                    error!(key = %event.key, error = %e, "Ignoring undecodable topic configuration");
                    return;
                }
            };
            if let Err(e) = topic_config.validate() {
                error!(key = %event.key, error = %e, "Ignoring invalid topic configuration");
                return;
            }

            info!(topics = ?topic_config.topics, "Topic configuration changed");
            if updates.send(topic_config).is_err() {
                debug!("Manager stopped, dropping configuration update");
            }
        })
    }

    /// The most recently applied topic configuration.
    pub fn topic_config(&self) -> &TopicConfig {
        &self.topic_config
    }

    /// Topics that currently have a running consumer, sorted.
    pub fn running_topics(&self) -> Vec<&str> {
        self.topics.keys().map(String::as_str).collect()
    }

    /// Bring the running consumers in line with `topic_config`.
    ///
    /// Topics no longer listed are stopped first, then newly listed topics are
    /// started. Topics in both sets keep their consumer untouched. A topic
    /// whose consumer fails to start is logged and left out; the next
    /// configuration that still lists it retries it.
    ///
    /// # Returns
    ///
    /// The diff that was applied.
    #[instrument(skip_all, fields(topics = ?topic_config.topics))]
    pub async fn reconcile(&mut self, topic_config: TopicConfig) -> TopicDiff {
        let diff = TopicDiff::between(self.topics.keys(), &topic_config);
        self.topic_config = topic_config;

        if diff.is_empty() {
            debug!("Topic set unchanged");
            return diff;
        }

        // Stopping consumers wait on the publisher to resolve their envelopes.
        if !diff.to_stop.is_empty() {
            if let Err(e) = self.ensure_publisher() {
                error!(error = %e, "Failed to start publisher before stopping topics");
            }
        }

        for topic in &diff.to_stop {
            if let Some(mut consumer) = self.topics.remove(topic) {
                consumer.stop().await;
            }
        }

        let Some(sender) = self.sender.clone() else {
            warn!("Manager is stopping, not starting new topics");
            return diff;
        };
        let settings = self.topic_config.consumer_settings();

        for topic in &diff.to_start {
            match TopicConsumer::start(topic, &self.transport, &settings, sender.clone()).await {
                Ok(consumer) => {
                    self.topics.insert(topic.clone(), consumer);
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "Failed to start topic consumer");
                }
            }
        }

        info!(
            started = ?diff.to_start,
            stopped = ?diff.to_stop,
            running = self.topics.len(),
            "Topics reconciled"
        );
        diff
    }

    /// Start the publisher and the initial consumers, then apply configuration
    /// updates until `shutdown` resolves. Stops everything before returning.
    pub async fn launch<F>(&mut self, shutdown: F) -> Result<PublisherStats, IngestError>
    where
        F: Future<Output = ()> + Send,
    {
        self.ensure_publisher()?;

        let initial = self.topic_config.clone();
        self.reconcile(initial).await;

        info!(running = self.topics.len(), "NSQ indexer running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
                update = self.updates_rx.recv() => {
                    // The manager holds a sender, so the channel never closes here.
                    if let Some(topic_config) = update {
                        self.reconcile(topic_config).await;
                    }
                }
            }
        }

        Ok(self.stop().await)
    }

    /// `initialize` followed by `launch`.
    ///
    /// When initialization fails the store is closed before the error is
    /// returned, which revokes its session lease.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<PublisherStats, IngestError>
    where
        F: Future<Output = ()> + Send,
    {
        if let Err(e) = self.initialize().await {
            error!(error = %e, "Manager initialization failed");
            self.release_store().await;
            return Err(e);
        }
        self.launch(shutdown).await
    }

    async fn release_store(&mut self) {
        if self.watching {
            self.topic_store.store().unwatch(WATCH_PREFIX).await;
            self.watching = false;
        }
        if let Err(e) = self.topic_store.store().close().await {
            warn!(error = %e, "Failed to close coordination store");
        }
    }

    fn ensure_publisher(&mut self) -> Result<(), IngestError> {
        if self.publisher.is_some() {
            return Ok(());
        }
        self.start_publisher()
    }

    fn start_publisher(&mut self) -> Result<(), IngestError> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| IngestError::ChannelError("publisher already started".to_string()))?;
        let publisher =
            BatchPublisher::with_config(Arc::clone(&self.provider), self.config.publisher.clone());
        self.publisher = Some(tokio::spawn(publisher.run(receiver)));
        Ok(())
    }

    /// Stop every consumer, drain the publisher and release the store and backend.
    ///
    /// Consumers stop concurrently. Each one stops pulling deliveries, then
    /// waits until the publisher has finished or requeued what it forwarded
    /// before its subscription is released. Calling `stop` again is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> PublisherStats {
        if self.stopped {
            debug!("Manager already stopped");
            return PublisherStats::default();
        }
        self.stopped = true;

        if self.watching {
            self.topic_store.store().unwatch(WATCH_PREFIX).await;
            self.watching = false;
        }

        // A manager that never launched may still hold envelopes from reconcile.
        // The publisher must run while consumers stop, since each consumer
        // waits for its forwarded envelopes to be resolved.
        if self.receiver.is_some() {
            if let Err(e) = self.ensure_publisher() {
                error!(error = %e, "Failed to start publisher for draining");
            }
        }

        // The channel closes once the last consumer has released its sender,
        // so the publisher's final flush sees every forwarded message.
        self.sender = None;

        let consumers = std::mem::take(&mut self.topics);
        info!(count = consumers.len(), "Stopping topic consumers");
        join_all(
            consumers
                .into_values()
                .map(|mut consumer| async move { consumer.stop().await }),
        )
        .await;

        let stats = match self.publisher.take() {
            Some(handle) => match handle.await {
                Ok(stats) => stats,
                Err(e) => {
                    error!(error = %e, "Publisher task failed");
                    PublisherStats::default()
                }
            },
            None => PublisherStats::default(),
        };

        if let Err(e) = self.provider.close().await {
            warn!(error = %e, "Failed to close indexing backend client");
        }
        if let Err(e) = self.topic_store.store().close().await {
            warn!(error = %e, "Failed to close coordination store");
        }

        info!(
            messages_finished = stats.messages_finished,
            messages_requeued = stats.messages_requeued,
            "NSQ indexer stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{Delivery, Subscription};
    use async_trait::async_trait;
    use nsq_indexer_repository::{BulkIndexRequest, BulkIndexSummary, SearchIndexError};
    use nsq_indexer_shared::ConsumerSettings;
    use nsq_indexer_store::InMemoryStore;
    use std::sync::Mutex;

    struct MockSearchProvider {
        ready: bool,
    }

    #[async_trait]
    impl SearchIndexProvider for MockSearchProvider {
        async fn check_ready(&self) -> Result<(), SearchIndexError> {
            if self.ready {
                Ok(())
            } else {
                Err(SearchIndexError::connection("connection refused"))
            }
        }

        async fn bulk_index(
            &self,
            requests: &[BulkIndexRequest],
        ) -> Result<BulkIndexSummary, SearchIndexError> {
            Ok(BulkIndexSummary::all_succeeded(requests.len()))
        }
    }

    struct IdleSubscription;

    #[async_trait]
    impl Subscription for IdleSubscription {
        async fn next_delivery(&mut self) -> Option<Delivery> {
            futures::future::pending().await
        }

        async fn stop(self: Box<Self>) {}
    }

    /// Records subscriptions; topics listed in `failing` cannot be subscribed.
    #[derive(Default)]
    struct MockTransport {
        subscribed: Mutex<Vec<String>>,
        failing: Vec<String>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn subscribe(
            &self,
            topic: &str,
            _settings: &ConsumerSettings,
        ) -> Result<Box<dyn Subscription>, IngestError> {
            if self.failing.iter().any(|t| t == topic) {
                return Err(IngestError::connection("lookupd unreachable"));
            }
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(Box::new(IdleSubscription))
        }
    }

    fn topic_config(topics: &[&str]) -> TopicConfig {
        TopicConfig {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn manager(store: Arc<InMemoryStore>, transport: Arc<MockTransport>, ready: bool) -> Manager {
        Manager::new(
            ManagerConfig::default(),
            Arc::new(MockSearchProvider { ready }),
            store,
            transport,
        )
    }

    #[tokio::test]
    async fn test_initialize_fails_when_backend_not_ready() {
        let store = Arc::new(InMemoryStore::new());
        store.put("/dev", br#"{"topics": ["a"]}"#.to_vec());
        let mut manager = manager(store, Arc::new(MockTransport::default()), false);

        let result = manager.initialize().await;
        assert!(matches!(result, Err(IngestError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_initialize_fails_without_stored_config() {
        let store = Arc::new(InMemoryStore::new());
        let mut manager = manager(store.clone(), Arc::new(MockTransport::default()), true);

        let result = manager.initialize().await;
        assert!(matches!(result, Err(IngestError::StoreError(_))));
        assert_eq!(store.watch_count(), 0);
    }

    #[tokio::test]
    async fn test_run_closes_store_when_initialization_fails() {
        let store = Arc::new(InMemoryStore::new());
        let mut manager = manager(store.clone(), Arc::new(MockTransport::default()), true);

        let result = manager.run(futures::future::pending()).await;
        assert!(matches!(result, Err(IngestError::StoreError(_))));
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_run_closes_store_when_backend_not_ready() {
        let store = Arc::new(InMemoryStore::new());
        store.put("/dev", br#"{"topics": ["a"]}"#.to_vec());
        let transport = Arc::new(MockTransport::default());
        let mut manager = manager(store.clone(), transport.clone(), false);

        let result = manager.run(futures::future::pending()).await;
        assert!(matches!(result, Err(IngestError::ConnectionError(_))));
        assert!(store.is_closed());
        assert!(transport.subscribed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_loads_config_and_watches() {
        let store = Arc::new(InMemoryStore::new());
        store.put("/dev", br#"{"topics": ["a", "b"], "channel": "indexer"}"#.to_vec());
        let mut manager = manager(store.clone(), Arc::new(MockTransport::default()), true);

        manager.initialize().await.unwrap();
        assert_eq!(manager.topic_config().topics, vec!["a", "b"]);
        assert_eq!(manager.topic_config().channel, "indexer");
        assert_eq!(store.watch_count(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let transport = Arc::new(MockTransport::default());
        let mut manager = manager(Arc::new(InMemoryStore::new()), transport.clone(), true);

        let first = manager.reconcile(topic_config(&["a", "b"])).await;
        assert_eq!(first.to_start, vec!["a", "b"]);
        assert_eq!(manager.running_topics(), vec!["a", "b"]);

        let second = manager.reconcile(topic_config(&["a", "b"])).await;
        assert!(second.is_empty());
        assert_eq!(transport.subscribed.lock().unwrap().len(), 2);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_reconcile_keeps_unchanged_topics() {
        let transport = Arc::new(MockTransport::default());
        let mut manager = manager(Arc::new(InMemoryStore::new()), transport.clone(), true);

        manager.reconcile(topic_config(&["a", "b"])).await;
        let diff = manager.reconcile(topic_config(&["b", "c"])).await;

        assert_eq!(diff.to_stop, vec!["a"]);
        assert_eq!(diff.to_start, vec!["c"]);
        assert_eq!(manager.running_topics(), vec!["b", "c"]);
        // "b" was subscribed once and never restarted.
        assert_eq!(*transport.subscribed.lock().unwrap(), vec!["a", "b", "c"]);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_failed_topic_is_retried_on_next_reconcile() {
        let transport = Arc::new(MockTransport {
            failing: vec!["bad".to_string()],
            ..Default::default()
        });
        let mut manager = manager(Arc::new(InMemoryStore::new()), transport, true);

        manager.reconcile(topic_config(&["good", "bad"])).await;
        assert_eq!(manager.running_topics(), vec!["good"]);

        let diff = manager.reconcile(topic_config(&["good", "bad"])).await;
        assert_eq!(diff.to_start, vec!["bad"]);
        assert_eq!(manager.running_topics(), vec!["good"]);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_topics_start_one_consumer() {
        let transport = Arc::new(MockTransport::default());
        let mut manager = manager(Arc::new(InMemoryStore::new()), transport.clone(), true);

        manager.reconcile(topic_config(&["a", "a", "b"])).await;
        assert_eq!(manager.running_topics(), vec!["a", "b"]);
        assert_eq!(transport.subscribed.lock().unwrap().len(), 2);

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        store.put("/dev", br#"{"topics": ["a"]}"#.to_vec());
        let mut manager = manager(store.clone(), Arc::new(MockTransport::default()), true);

        manager.initialize().await.unwrap();
        manager.reconcile(topic_config(&["a"])).await;

        manager.stop().await;
        assert!(manager.running_topics().is_empty());
        assert_eq!(store.watch_count(), 0);
        assert!(store.is_closed());

        let second = manager.stop().await;
        assert_eq!(second, PublisherStats::default());
    }

    #[test]
    fn test_watch_callback_filters_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback = Manager::watch_callback("dev", tx);

        let event = |key: &str, kind: WatchEventKind, value: &[u8]| WatchEvent {
            kind,
            key: key.to_string(),
            previous: None,
            value: value.to_vec(),
        };

        callback(event("/prod", WatchEventKind::Put, br#"{"topics": ["x"]}"#));
        callback(event("/dev", WatchEventKind::Delete, b""));
        callback(event("/dev", WatchEventKind::Put, b"not json"));
        callback(event("/dev", WatchEventKind::Put, br#"{"topics": ["x"], "channel": ""}"#));
        callback(event("/dev", WatchEventKind::Put, br#"{"topics": ["y"]}"#));

        let update = rx.try_recv().unwrap();
        assert_eq!(update.topics, vec!["y"]);
        assert!(rx.try_recv().is_err());
    }
}
