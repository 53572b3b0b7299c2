//! Producer counters and the snapshot handed to callers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Producer counters, updated by callers and partition workers.
#[derive(Debug, Default)]
pub(crate) struct ProducerStats {
    pub(crate) records_enqueued: AtomicU64,
    pub(crate) records_rejected: AtomicU64,
    pub(crate) records_delivered: AtomicU64,
    pub(crate) records_failed: AtomicU64,
    pub(crate) batches_sent: AtomicU64,
    pub(crate) batches_acked: AtomicU64,
    pub(crate) retries: AtomicU64,
}

impl ProducerStats {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, queued_records: usize) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            records_delivered: self.records_delivered.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_acked: self.batches_acked.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            queued_records,
        }
    }
}

/// Point-in-time copy of the producer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProducerStatsSnapshot {
    pub records_enqueued: u64,
    /// Records refused at enqueue (buffer full, too large, closed)
    pub records_rejected: u64,
    pub records_delivered: u64,
    /// Records resolved with an error after being accepted
    pub records_failed: u64,
    /// Send attempts, retries included
    pub batches_sent: u64,
    pub batches_acked: u64,
    pub retries: u64,
    pub queued_records: usize,
}

impl ProducerStatsSnapshot {
    /// Accepted records not yet resolved either way.
    pub fn records_pending(&self) -> u64 {
        self.records_enqueued
            .saturating_sub(self.records_delivered + self.records_failed)
    }
}
