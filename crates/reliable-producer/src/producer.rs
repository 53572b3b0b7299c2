//! The producer handle applications publish through.

use crate::buffer::{Completion, PendingRecord, RecordBuffer};
use crate::config::ProducerConfig;
use crate::error::{ProducerError, Result};
use crate::partitioner::Partitioner;
use crate::record::{Record, RecordMetadata, TopicPartition};
use crate::stats::{ProducerStats, ProducerStatsSnapshot};
use crate::transport::Transport;
use crate::worker::PartitionWorker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, Notify, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the producer handle and its partition workers.
pub(crate) struct Shared {
    pub(crate) config: ProducerConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) stats: ProducerStats,
    pub(crate) batch_ids: Arc<AtomicU64>,
    /// Cancelled when shutdown stops waiting for in-flight work
    pub(crate) cancel: CancellationToken,
    /// Accepted records not yet resolved
    pending: AtomicU64,
    idle: Notify,
}

impl Shared {
    /// Hand a record's outcome to its caller.
    pub(crate) fn resolve(&self, completion: Completion, result: Result<RecordMetadata>) {
        let counter = if result.is_ok() {
            &self.stats.records_delivered
        } else {
            &self.stats.records_failed
        };
        ProducerStats::add(counter, 1);
        // The caller may have dropped its handle; the outcome still counts.
        let _ = completion.send(result);
        self.release_pending();
    }

    fn acquire_pending(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn release_pending(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn pending(&self) -> u64 {
        self.pending.load(Ordering::Acquire)
    }
}

// ============================================================================
// Delivery handle
// ============================================================================

/// Resolves once the record is acknowledged or has failed for good.
#[derive(Debug)]
#[must_use = "dropping the handle does not cancel delivery, but the outcome is lost"]
pub struct DeliveryHandle {
    rx: oneshot::Receiver<Result<RecordMetadata>>,
}

impl Future for DeliveryHandle {
    type Output = Result<RecordMetadata>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ProducerError::Shutdown)))
    }
}

/// What happened to outstanding records when the producer closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Everything was resolved within the grace period
    pub drained: bool,
    /// Records failed with [`ProducerError::Shutdown`]
    pub undelivered: usize,
}

// ============================================================================
// Producer
// ============================================================================

struct ProducerInner {
    shared: Arc<Shared>,
    buffer: RecordBuffer,
    partitioner: Partitioner,
    partition_counts: RwLock<HashMap<String, u32>>,
}

impl Drop for ProducerInner {
    fn drop(&mut self) {
        // Workers drain what is left and exit on their own.
        self.buffer.close();
    }
}

/// Batching producer with per-partition ordering, retries and bounded
/// buffering.
///
/// Cloning is cheap; clones share the same buffers and workers. Workers are
/// spawned on the current tokio runtime the first time a partition is used.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl Producer {
    pub fn new(config: ProducerConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        info!(
            "Creating producer for {} (acks={}, batch_size={}B, linger={}ms, max_retries={})",
            config.broker_addresses.join(","),
            config.acks.as_kafka_str(),
            config.batch_size_bytes,
            config.linger_ms,
            config.max_retries
        );

        let buffer = RecordBuffer::new(
            config.buffer_capacity,
            config.buffer_full,
            config.buffer_block_timeout(),
        );
        let shared = Arc::new(Shared {
            config,
            transport,
            stats: ProducerStats::default(),
            batch_ids: Arc::new(AtomicU64::new(0)),
            cancel: CancellationToken::new(),
            pending: AtomicU64::new(0),
            idle: Notify::new(),
        });

        Ok(Self {
            inner: Arc::new(ProducerInner {
                shared,
                buffer,
                partitioner: Partitioner::new(),
                partition_counts: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.inner.shared.config
    }

    /// Enqueue a record, choosing its partition from the key.
    ///
    /// Returns as soon as the record is buffered. The handle resolves when
    /// the record is delivered or has failed for good.
    pub async fn enqueue(
        &self,
        topic: &str,
        key: Option<Bytes>,
        payload: Bytes,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<DeliveryHandle> {
        let partitions = match self.partition_count(topic).await {
            Ok(partitions) => partitions,
            Err(e) => {
                ProducerStats::add(&self.inner.shared.stats.records_rejected, 1);
                return Err(e);
            }
        };
        let partition = self
            .inner
            .partitioner
            .partition(key.as_deref(), partitions);
        let record = Record::new(TopicPartition::new(topic, partition), key, payload, timestamp);
        self.enqueue_record(record).await
    }

    /// Enqueue a record whose partition is already chosen.
    pub async fn enqueue_record(&self, record: Record) -> Result<DeliveryHandle> {
        let result = self.try_enqueue(record).await;
        if result.is_err() {
            ProducerStats::add(&self.inner.shared.stats.records_rejected, 1);
        }
        result
    }

    /// Enqueue a record and wait for its delivery.
    pub async fn send(
        &self,
        topic: &str,
        key: Option<Bytes>,
        payload: Bytes,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<RecordMetadata> {
        self.enqueue(topic, key, payload, timestamp).await?.await
    }

    async fn try_enqueue(&self, record: Record) -> Result<DeliveryHandle> {
        let shared = &self.inner.shared;
        let max = shared.config.batch_size_bytes;
        if record.size() > max {
            return Err(ProducerError::RecordTooLarge {
                size: record.size(),
                max,
            });
        }

        let destination = record.destination().clone();
        let partitions = self.partition_count(&destination.topic).await?;
        if destination.partition >= partitions {
            return Err(ProducerError::UnknownPartition {
                topic: destination.topic,
                partition: destination.partition,
            });
        }

        let queue = self.inner.buffer.queue_for(&destination, |queue| {
            let worker = PartitionWorker::new(queue, Arc::clone(shared));
            tokio::spawn(worker.run())
        })?;

        let (tx, rx) = oneshot::channel();
        shared.acquire_pending();
        if let Err(e) = self
            .inner
            .buffer
            .enqueue(&queue, PendingRecord::new(record, tx))
            .await
        {
            shared.release_pending();
            return Err(e);
        }
        ProducerStats::add(&shared.stats.records_enqueued, 1);
        Ok(DeliveryHandle { rx })
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        if let Some(count) = self.inner.partition_counts.read().await.get(topic) {
            return Ok(*count);
        }

        let count = self.inner.shared.transport.partition_count(topic).await?;
        if count == 0 {
            return Err(ProducerError::Transport(format!(
                "topic '{topic}' has no partitions"
            )));
        }
        debug!("Topic '{topic}' has {count} partitions");
        self.inner
            .partition_counts
            .write()
            .await
            .insert(topic.to_string(), count);
        Ok(count)
    }

    /// Send everything buffered without waiting for linger, and wait until
    /// every accepted record is resolved.
    ///
    /// Gives up after the configured delivery timeout.
    pub async fn flush(&self) -> Result<()> {
        let shared = &self.inner.shared;
        let limit = shared.config.delivery_timeout();
        let wait_idle = async {
            loop {
                let idle = shared.idle.notified();
                tokio::pin!(idle);
                idle.as_mut().enable();
                if shared.pending() == 0 {
                    return;
                }
                self.inner.buffer.request_flush();
                idle.await;
            }
        };
        tokio::time::timeout(limit, wait_idle)
            .await
            .map_err(|_| ProducerError::FlushTimeout(limit))
    }

    /// Close with the configured shutdown grace period.
    pub async fn close(&self) -> ShutdownReport {
        self.close_with_grace(self.inner.shared.config.shutdown_grace())
            .await
    }

    /// Stop accepting records and deliver what is outstanding.
    ///
    /// Records still unresolved after `grace` fail with
    /// [`ProducerError::Shutdown`]. Closing again is a no-op.
    pub async fn close_with_grace(&self, grace: Duration) -> ShutdownReport {
        let workers = self.inner.buffer.close();
        if workers.is_empty() {
            return ShutdownReport {
                drained: true,
                undelivered: 0,
            };
        }
        info!(
            "Closing producer: {} partitions, {} records outstanding",
            workers.len(),
            self.inner.shared.pending()
        );

        let deadline = Instant::now() + grace;
        let mut undelivered = 0;
        let mut lagging = Vec::new();
        for mut worker in workers {
            match tokio::time::timeout_at(deadline, &mut worker).await {
                Ok(joined) => undelivered += joined_count(joined),
                Err(_) => lagging.push(worker),
            }
        }

        let drained = lagging.is_empty();
        if !drained {
            warn!(
                "Shutdown grace of {grace:?} elapsed with {} partitions still busy",
                lagging.len()
            );
            self.inner.shared.cancel.cancel();
            for worker in lagging {
                undelivered += joined_count(worker.await);
            }
        }

        info!("Producer closed ({undelivered} records undelivered)");
        ShutdownReport {
            drained,
            undelivered,
        }
    }

    pub fn stats(&self) -> ProducerStatsSnapshot {
        self.inner
            .shared
            .stats
            .snapshot(self.inner.buffer.queued_records())
    }

    /// Partitions that have received records, sorted.
    pub fn partitions(&self) -> Vec<TopicPartition> {
        self.inner.buffer.partitions()
    }
}

fn joined_count(joined: std::result::Result<usize, tokio::task::JoinError>) -> usize {
    joined.unwrap_or_else(|e| {
        error!("Partition worker failed: {e}");
        0
    })
}
