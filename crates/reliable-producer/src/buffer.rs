//! Record buffer: bounded per-partition FIFO queues of unbatched records.
//!
//! Application tasks push into a [`PartitionQueue`]; the partition's worker
//! drains it into batches. Both sides go through the same mutex, and two
//! `Notify`s carry the wakeups ("records available" for the worker, "space
//! available" for callers blocked on a full queue).

use crate::config::BufferFullMode;
use crate::error::{ProducerError, Result};
use crate::record::{Record, RecordMetadata, TopicPartition};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Sender half of a caller's delivery handle.
pub type Completion = oneshot::Sender<Result<RecordMetadata>>;

/// A record waiting in a partition queue, with the channel its caller awaits.
#[derive(Debug)]
pub struct PendingRecord {
    pub(crate) record: Record,
    pub(crate) enqueued_at: Instant,
    pub(crate) completion: Completion,
}

impl PendingRecord {
    pub(crate) fn new(record: Record, completion: Completion) -> Self {
        Self {
            record,
            enqueued_at: Instant::now(),
            completion,
        }
    }
}

/// Point-in-time view of a partition queue, used by the batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    pub len: usize,
    pub bytes: usize,
    /// Enqueue instant of the oldest queued record
    pub oldest: Option<Instant>,
    pub flush_requested: bool,
    pub closed: bool,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Default)]
struct QueueState {
    records: VecDeque<PendingRecord>,
    bytes: usize,
    flush_requested: bool,
    closed: bool,
}

enum PushRejected {
    Full(PendingRecord),
    Closed,
}

/// Bounded FIFO of records for one partition.
#[derive(Debug)]
pub struct PartitionQueue {
    destination: TopicPartition,
    capacity: usize,
    state: Mutex<QueueState>,
    records_available: Notify,
    space_available: Notify,
}

impl PartitionQueue {
    pub fn new(destination: TopicPartition, capacity: usize) -> Self {
        Self {
            destination,
            capacity,
            state: Mutex::new(QueueState::default()),
            records_available: Notify::new(),
            space_available: Notify::new(),
        }
    }

    pub fn destination(&self) -> &TopicPartition {
        &self.destination
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            len: state.records.len(),
            bytes: state.bytes,
            oldest: state.records.front().map(|p| p.enqueued_at),
            flush_requested: state.flush_requested,
            closed: state.closed,
        }
    }

    fn try_push(&self, pending: PendingRecord) -> std::result::Result<(), PushRejected> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PushRejected::Closed);
            }
            if state.records.len() >= self.capacity {
                return Err(PushRejected::Full(pending));
            }
            state.bytes += pending.record.size();
            state.records.push_back(pending);
        }
        self.records_available.notify_one();
        Ok(())
    }

    /// Append a record, applying the configured full-queue behaviour.
    pub(crate) async fn push(
        &self,
        mut pending: PendingRecord,
        mode: BufferFullMode,
        block_timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + block_timeout;
        loop {
            // Register interest before checking so a drain between the check
            // and the wait is not missed.
            let space = self.space_available.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_push(pending) {
                Ok(()) => return Ok(()),
                Err(PushRejected::Closed) => return Err(ProducerError::Closed),
                Err(PushRejected::Full(rejected)) => {
                    if mode == BufferFullMode::Reject {
                        return Err(self.buffer_full());
                    }
                    pending = rejected;
                }
            }

            if tokio::time::timeout_at(deadline, space).await.is_err() {
                return Err(self.buffer_full());
            }
        }
    }

    fn buffer_full(&self) -> ProducerError {
        ProducerError::BufferFull {
            topic: self.destination.topic.clone(),
            partition: self.destination.partition,
        }
    }

    /// Remove the longest FIFO prefix whose total size fits in `max_bytes`.
    ///
    /// Always removes at least one record when the queue is non-empty.
    pub(crate) fn drain_prefix(&self, max_bytes: usize) -> Vec<PendingRecord> {
        let drained = {
            let mut state = self.lock();
            let mut taken_bytes = 0;
            let mut count = 0;
            for pending in state.records.iter() {
                let size = pending.record.size();
                if count > 0 && taken_bytes + size > max_bytes {
                    break;
                }
                taken_bytes += size;
                count += 1;
            }
            let drained: Vec<PendingRecord> = state.records.drain(..count).collect();
            state.bytes -= taken_bytes;
            if state.records.is_empty() {
                state.flush_requested = false;
            }
            drained
        };
        if !drained.is_empty() {
            self.space_available.notify_waiters();
        }
        drained
    }

    /// Remove everything. Used when records are abandoned at shutdown.
    pub(crate) fn drain_all(&self) -> Vec<PendingRecord> {
        let drained = {
            let mut state = self.lock();
            state.bytes = 0;
            state.flush_requested = false;
            state.records.drain(..).collect::<Vec<_>>()
        };
        self.space_available.notify_waiters();
        drained
    }

    /// Ask the worker to send what is queued without waiting for linger.
    pub(crate) fn request_flush(&self) {
        {
            let mut state = self.lock();
            if state.records.is_empty() {
                return;
            }
            state.flush_requested = true;
        }
        self.records_available.notify_one();
    }

    /// Stop accepting records. Blocked callers are woken and see `Closed`.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.records_available.notify_one();
        self.space_available.notify_waiters();
    }

    /// Resolves when a record is pushed, or a flush or close is requested.
    pub(crate) async fn records_available(&self) {
        self.records_available.notified().await
    }
}

struct PartitionSlot {
    queue: Arc<PartitionQueue>,
    worker: Option<JoinHandle<usize>>,
}

#[derive(Default)]
struct BufferState {
    closed: bool,
    partitions: HashMap<TopicPartition, PartitionSlot>,
}

/// All partition queues of a producer.
///
/// Queues are created lazily on the first record for a partition, together
/// with the worker task that drains them.
pub(crate) struct RecordBuffer {
    capacity: usize,
    mode: BufferFullMode,
    block_timeout: Duration,
    state: Mutex<BufferState>,
}

impl RecordBuffer {
    pub(crate) fn new(capacity: usize, mode: BufferFullMode, block_timeout: Duration) -> Self {
        Self {
            capacity,
            mode,
            block_timeout,
            state: Mutex::new(BufferState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the queue for `destination`, creating it and its worker if needed.
    pub(crate) fn queue_for<F>(
        &self,
        destination: &TopicPartition,
        spawn_worker: F,
    ) -> Result<Arc<PartitionQueue>>
    where
        F: FnOnce(Arc<PartitionQueue>) -> JoinHandle<usize>,
    {
        let mut state = self.lock();
        if state.closed {
            return Err(ProducerError::Closed);
        }
        if let Some(slot) = state.partitions.get(destination) {
            return Ok(Arc::clone(&slot.queue));
        }

        let queue = Arc::new(PartitionQueue::new(destination.clone(), self.capacity));
        let worker = spawn_worker(Arc::clone(&queue));
        state.partitions.insert(
            destination.clone(),
            PartitionSlot {
                queue: Arc::clone(&queue),
                worker: Some(worker),
            },
        );
        Ok(queue)
    }

    pub(crate) async fn enqueue(&self, queue: &PartitionQueue, pending: PendingRecord) -> Result<()> {
        queue.push(pending, self.mode, self.block_timeout).await
    }

    pub(crate) fn request_flush(&self) {
        for slot in self.lock().partitions.values() {
            slot.queue.request_flush();
        }
    }

    /// Close every queue and hand back the worker handles.
    ///
    /// Later calls return no handles.
    pub(crate) fn close(&self) -> Vec<JoinHandle<usize>> {
        let mut state = self.lock();
        state.closed = true;
        state
            .partitions
            .values_mut()
            .filter_map(|slot| {
                slot.queue.close();
                slot.worker.take()
            })
            .collect()
    }

    pub(crate) fn partitions(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<TopicPartition> = self.lock().partitions.keys().cloned().collect();
        partitions.sort();
        partitions
    }

    pub(crate) fn queued_records(&self) -> usize {
        self.lock()
            .partitions
            .values()
            .map(|slot| slot.queue.snapshot().len)
            .sum()
    }
}
