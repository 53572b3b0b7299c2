//! Per-partition worker.
//!
//! One task per partition owns the batcher, the acknowledgment tracker and
//! the retry scheduler of that partition, so everything that decides send
//! order happens on a single task. Sends run concurrently as futures polled
//! by the worker, up to the in-flight limit.

use crate::batch::{Batcher, Readiness, RecordBatch};
use crate::buffer::{Completion, PartitionQueue};
use crate::error::ProducerError;
use crate::producer::Shared;
use crate::record::RecordMetadata;
use crate::retry::{Backoff, RetryDecision, RetryScheduler};
use crate::stats::ProducerStats;
use crate::tracker::AckTracker;
use crate::transport::{DeliveryOutcome, DeliveryResult};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

type InFlightSend = BoxFuture<'static, (RecordBatch, DeliveryResult)>;

pub(crate) struct PartitionWorker {
    queue: Arc<PartitionQueue>,
    shared: Arc<Shared>,
    batcher: Batcher,
    tracker: AckTracker,
    retries: RetryScheduler,
    request_timeout: Duration,
    in_flight: FuturesUnordered<InFlightSend>,
}

impl PartitionWorker {
    pub(crate) fn new(queue: Arc<PartitionQueue>, shared: Arc<Shared>) -> Self {
        let config = &shared.config;
        let destination = queue.destination().clone();
        let batcher = Batcher::new(
            destination.clone(),
            config.batch_size_bytes,
            config.linger(),
            Arc::clone(&shared.batch_ids),
        );
        let tracker = AckTracker::new(destination, config.max_in_flight_per_partition);
        let retries = RetryScheduler::new(
            config.max_retries,
            Backoff::new(config.retry_backoff(), config.retry_backoff_max()),
        );
        let request_timeout = config.request_timeout();

        Self {
            queue,
            shared,
            batcher,
            tracker,
            retries,
            request_timeout,
            in_flight: FuturesUnordered::new(),
        }
    }

    /// Run until the queue is closed and every record is resolved.
    ///
    /// Returns the number of records abandoned because shutdown was forced.
    pub(crate) async fn run(mut self) -> usize {
        debug!("Worker for {} started", self.queue.destination());
        loop {
            let now = Instant::now();
            self.dispatch(now);

            let snapshot = self.queue.snapshot();
            if snapshot.closed && snapshot.is_empty() && self.tracker.is_empty() {
                debug!("Worker for {} drained", self.queue.destination());
                return 0;
            }

            let linger_deadline = if self.tracker.has_capacity() {
                match self.batcher.readiness(&snapshot, now, false) {
                    Readiness::WaitUntil(deadline) => Some(deadline),
                    Readiness::Empty | Readiness::Ready => None,
                }
            } else {
                None
            };
            let retry_deadline = self.retries.next_ready_at();

            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => {
                    return self.abandon();
                }
                Some((batch, result)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.on_result(batch, result);
                }
                _ = sleep_until(retry_deadline) => {}
                _ = sleep_until(linger_deadline) => {}
                _ = self.queue.records_available() => {}
            }
        }
    }

    /// Send due retries, then as many new batches as the tracker allows.
    fn dispatch(&mut self, now: Instant) {
        // Retries first: they are older than anything still queued.
        while let Some(batch) = self.retries.pop_ready(now) {
            self.send(batch);
        }

        while self.tracker.has_capacity() {
            let snapshot = self.queue.snapshot();
            let force = snapshot.flush_requested || snapshot.closed;
            if self.batcher.readiness(&snapshot, now, force) != Readiness::Ready {
                break;
            }
            let Some((batch, completions)) = self.batcher.drain(&self.queue) else {
                break;
            };
            self.tracker.track(&batch, completions);
            self.send(batch);
        }
    }

    fn send(&mut self, mut batch: RecordBatch) {
        batch.begin_attempt();
        self.tracker
            .mark_in_flight(batch.sequence(), batch.attempts());

        let stats = &self.shared.stats;
        ProducerStats::add(&stats.batches_sent, 1);
        if batch.attempts() > 1 {
            ProducerStats::add(&stats.retries, 1);
        }
        debug!(
            "Sending batch {} of {} ({} records, {} bytes, attempt {})",
            batch.sequence(),
            batch.destination(),
            batch.len(),
            batch.size_bytes(),
            batch.attempts()
        );

        let transport = Arc::clone(&self.shared.transport);
        let request_timeout = self.request_timeout;
        self.in_flight.push(
            async move {
                let result = match tokio::time::timeout(request_timeout, transport.send(&batch)).await {
                    Ok(result) => result,
                    Err(_) => DeliveryResult::timed_out(&batch),
                };
                (batch, result)
            }
            .boxed(),
        );
    }

    fn on_result(&mut self, batch: RecordBatch, result: DeliveryResult) {
        let reason = match result.outcome {
            DeliveryOutcome::Acked { base_offset } => {
                self.on_acked(batch, base_offset);
                return;
            }
            DeliveryOutcome::Failed(reason) => reason,
            DeliveryOutcome::TimedOut => {
                format!("no response within {:?}", self.request_timeout)
            }
        };

        match self.retries.on_failure(batch, reason, Instant::now()) {
            RetryDecision::Scheduled {
                sequence,
                next_attempt,
                delay,
                ready_at,
                error,
            } => {
                warn!(
                    "Batch {sequence} of {} failed, retrying in {delay:?} (attempt {next_attempt}): {error}",
                    self.queue.destination()
                );
                self.tracker
                    .mark_backoff(sequence, next_attempt - 1, ready_at);
            }
            RetryDecision::Exhausted { batch, error } => {
                error!(
                    "Batch {} of {} failed permanently ({} records): {error}",
                    batch.sequence(),
                    batch.destination(),
                    batch.len()
                );
                for completion in self.tracker.release(batch.sequence()) {
                    self.shared.resolve(completion, Err(error.clone()));
                }
            }
        }
    }

    fn on_acked(&mut self, batch: RecordBatch, base_offset: Option<i64>) {
        ProducerStats::add(&self.shared.stats.batches_acked, 1);
        debug!(
            "Batch {} of {} acknowledged after {} attempt(s)",
            batch.sequence(),
            batch.destination(),
            batch.attempts()
        );

        let completions = self.tracker.release(batch.sequence());
        let destination = batch.destination();
        for (index, (record, completion)) in batch.records().iter().zip(completions).enumerate() {
            let metadata = RecordMetadata {
                topic: destination.topic.clone(),
                partition: destination.partition,
                offset: base_offset.map(|base| base + index as i64),
                timestamp: record.timestamp(),
                attempts: batch.attempts(),
            };
            self.shared.resolve(completion, Ok(metadata));
        }
    }

    /// Forced shutdown: fail everything still owned by this partition.
    fn abandon(mut self) -> usize {
        self.retries.clear();
        let mut abandoned: Vec<Completion> = self.tracker.drain();
        abandoned.extend(
            self.queue
                .drain_all()
                .into_iter()
                .map(|pending| pending.completion),
        );

        let count = abandoned.len();
        if count > 0 {
            warn!(
                "Abandoning {count} undelivered records for {}",
                self.queue.destination()
            );
        }
        for completion in abandoned {
            self.shared.resolve(completion, Err(ProducerError::Shutdown));
        }
        count
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
