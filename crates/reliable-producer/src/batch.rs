//! Batches and the batcher that cuts them from a partition queue.

use crate::buffer::{Completion, PartitionQueue, QueueSnapshot};
use crate::record::{Record, TopicPartition};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Producer-wide unique batch identifier.
pub type BatchId = u64;

/// An ordered group of records for one partition, sent in one transport call.
///
/// The record list never changes after the batcher creates the batch; only
/// the attempt counter moves, once per send.
#[derive(Debug)]
pub struct RecordBatch {
    id: BatchId,
    destination: TopicPartition,
    sequence: u64,
    records: Vec<Record>,
    size_bytes: usize,
    attempts: u32,
}

impl RecordBatch {
    pub(crate) fn new(
        id: BatchId,
        destination: TopicPartition,
        sequence: u64,
        records: Vec<Record>,
    ) -> Self {
        let size_bytes = records.iter().map(Record::size).sum();
        Self {
            id,
            destination,
            sequence,
            records,
            size_bytes,
            attempts: 0,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn destination(&self) -> &TopicPartition {
        &self.destination
    }

    /// Position of this batch among the batches of its partition.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Send attempts started so far, including the current one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.attempts += 1;
    }
}

/// Whether a partition queue should be cut into a batch now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Nothing queued.
    Empty,
    /// Size reached, linger expired, or a flush was requested.
    Ready,
    /// Records are queued but may wait for more until this instant.
    WaitUntil(Instant),
}

/// Cuts batches from one partition's queue.
#[derive(Debug)]
pub struct Batcher {
    destination: TopicPartition,
    batch_size_bytes: usize,
    linger: Duration,
    next_sequence: u64,
    ids: Arc<AtomicU64>,
}

impl Batcher {
    pub fn new(
        destination: TopicPartition,
        batch_size_bytes: usize,
        linger: Duration,
        ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            destination,
            batch_size_bytes,
            linger,
            next_sequence: 0,
            ids,
        }
    }

    /// Decide whether to flush. `force` skips the linger wait.
    pub fn readiness(&self, snapshot: &QueueSnapshot, now: Instant, force: bool) -> Readiness {
        let Some(oldest) = snapshot.oldest else {
            return Readiness::Empty;
        };
        if force || snapshot.bytes >= self.batch_size_bytes {
            return Readiness::Ready;
        }
        let due = oldest + self.linger;
        if now >= due {
            Readiness::Ready
        } else {
            Readiness::WaitUntil(due)
        }
    }

    /// Take the next batch off the queue, with the completions of its records
    /// in the same order.
    pub(crate) fn drain(&mut self, queue: &PartitionQueue) -> Option<(RecordBatch, Vec<Completion>)> {
        let pending = queue.drain_prefix(self.batch_size_bytes);
        if pending.is_empty() {
            return None;
        }

        let mut records = Vec::with_capacity(pending.len());
        let mut completions = Vec::with_capacity(pending.len());
        for p in pending {
            records.push(p.record);
            completions.push(p.completion);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let id = self.ids.fetch_add(1, Ordering::Relaxed);
        Some((
            RecordBatch::new(id, self.destination.clone(), sequence, records),
            completions,
        ))
    }
}
