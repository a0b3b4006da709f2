//! Publisher module for the NSQ indexer.
//!
//! Accumulates envelopes from every topic consumer and writes them to the
//! indexing backend as bulk requests. A batch is flushed when it reaches the
//! size limit or when the flush timer fires, whichever comes first. A flush
//! resolves every message in the batch the same way: all finished on
//! success, all requeued on failure.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use nsq_indexer_repository::{BulkIndexRequest, SearchIndexProvider};

use crate::consumer::Envelope;
use crate::errors::IngestError;

/// Configuration for the batch publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Number of envelopes that triggers an immediate flush.
    pub max_batch_size: usize,
    /// Maximum time a non-empty batch waits before being flushed.
    pub flush_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush_interval: Duration::from_secs(1),
        }
    }
}

/// Totals accumulated over the publisher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Bulk requests accepted by the backend.
    pub batches_flushed: u64,
    /// Bulk requests that failed and were requeued.
    pub batches_failed: u64,
    /// Messages acknowledged after a successful flush.
    pub messages_finished: u64,
    /// Messages returned to NSQ after a failed flush.
    pub messages_requeued: u64,
}

/// Batches envelopes and bulk-indexes them.
pub struct BatchPublisher {
    provider: Arc<dyn SearchIndexProvider>,
    config: PublisherConfig,
    buffer: Vec<Envelope>,
    stats: PublisherStats,
}

impl BatchPublisher {
    /// Create a new publisher with the default configuration.
    pub fn new(provider: Arc<dyn SearchIndexProvider>) -> Self {
        Self::with_config(provider, PublisherConfig::default())
    }

    /// Create a new publisher with custom configuration.
    pub fn with_config(provider: Arc<dyn SearchIndexProvider>, config: PublisherConfig) -> Self {
        let max_batch_size = config.max_batch_size.max(1);
        Self {
            provider,
            config: PublisherConfig {
                max_batch_size,
                ..config
            },
            buffer: Vec::with_capacity(max_batch_size),
            stats: PublisherStats::default(),
        }
    }

    /// Number of envelopes waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consume envelopes until every sender has been dropped.
    ///
    /// Envelopes still buffered when the channel closes are flushed before
    /// returning, so every received message is either finished or requeued.
    #[instrument(skip_all, fields(max_batch_size = self.config.max_batch_size))]
    pub async fn run(mut self, mut receiver: mpsc::Receiver<Envelope>) -> PublisherStats {
        let period = self.config.flush_interval;
        let mut flush_timer = interval_at(Instant::now() + period, period);
        flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            flush_interval_ms = period.as_millis() as u64,
            "Batch publisher started"
        );

        loop {
            tokio::select! {
                envelope = receiver.recv() => {
                    match envelope {
                        Some(envelope) => {
                            self.buffer.push(envelope);
                            if self.buffer.len() >= self.config.max_batch_size {
                                debug!(batch_size = self.buffer.len(), "Batch full, flushing");
                                self.flush().await;
                                flush_timer.reset();
                            }
                        }
                        None => {
                            info!(pending = self.buffer.len(), "Envelope channel closed, draining");
                            self.flush().await;
                            break;
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    if !self.buffer.is_empty() {
                        debug!(batch_size = self.buffer.len(), "Flush timer fired");
                        self.flush().await;
                    }
                }
            }
        }

        info!(
            batches_flushed = self.stats.batches_flushed,
            batches_failed = self.stats.batches_failed,
            messages_finished = self.stats.messages_finished,
            messages_requeued = self.stats.messages_requeued,
            "Batch publisher stopped"
        );
        self.stats
    }

    /// Send the buffered envelopes as one bulk request and resolve each of them.
    ///
    /// The buffer is empty afterwards regardless of the outcome.
    #[instrument(skip(self), fields(batch_size = self.buffer.len()))]
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let batch: Vec<Envelope> = self.buffer.drain(..).collect();
        let requests: Vec<BulkIndexRequest> = batch.iter().map(Envelope::to_bulk_request).collect();

        match self.provider.bulk_index(&requests).await {
            Ok(summary) => {
                if summary.failed > 0 {
                    warn!(
                        total = summary.total,
                        failed = summary.failed,
                        "Bulk request accepted with item failures"
                    );
                    for failure in &summary.failures {
                        warn!(
                            position = failure.position,
                            index = %failure.index,
                            status = failure.status,
                            reason = %failure.reason,
                            "Document rejected by backend"
                        );
                    }
                }

                let count = batch.len() as u64;
                for envelope in batch {
                    envelope.finish().await;
                }
                self.stats.batches_flushed += 1;
                self.stats.messages_finished += count;
                debug!(count, took_ms = ?summary.took_ms, "Batch indexed");
            }
            Err(e) => {
                let err = IngestError::flush(e.to_string());
                error!(error = %err, count = batch.len(), "Bulk request failed, requeueing batch");

                let count = batch.len() as u64;
                for envelope in batch {
                    envelope.requeue().await;
                }
                self.stats.batches_failed += 1;
                self.stats.messages_requeued += count;
            }
        }
    }
}
