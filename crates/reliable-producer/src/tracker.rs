//! Acknowledgment tracker.
//!
//! Holds, per partition and batch sequence, the callers waiting on each batch
//! that has been handed to the transport and is not yet resolved. A batch
//! stays tracked while it backs off before a retry, so it keeps its send slot:
//! with one slot per partition nothing overtakes a batch that is being retried.

use crate::batch::RecordBatch;
use crate::buffer::Completion;
use crate::record::TopicPartition;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::debug;

/// Where a tracked batch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Handed to the transport, awaiting a delivery result.
    InFlight { attempt: u32 },
    /// Failed and waiting for its retry backoff to elapse.
    Backoff { attempt: u32, until: Instant },
}

#[derive(Debug)]
struct TrackedBatch {
    state: BatchState,
    completions: Vec<Completion>,
}

/// Tracks unresolved batches of one partition, keyed by sequence.
#[derive(Debug)]
pub struct AckTracker {
    destination: TopicPartition,
    max_in_flight: usize,
    batches: BTreeMap<u64, TrackedBatch>,
}

impl AckTracker {
    pub fn new(destination: TopicPartition, max_in_flight: usize) -> Self {
        Self {
            destination,
            max_in_flight,
            batches: BTreeMap::new(),
        }
    }

    /// Whether another new batch may be sent.
    pub fn has_capacity(&self) -> bool {
        self.batches.len() < self.max_in_flight
    }

    /// Register a batch that is about to be sent for the first time.
    pub fn track(&mut self, batch: &RecordBatch, completions: Vec<Completion>) {
        debug_assert_eq!(batch.len(), completions.len());
        debug!(
            "Tracking batch {} of {} ({} records)",
            batch.sequence(),
            self.destination,
            batch.len()
        );
        self.batches.insert(
            batch.sequence(),
            TrackedBatch {
                state: BatchState::InFlight {
                    attempt: batch.attempts(),
                },
                completions,
            },
        );
    }

    /// Record that a tracked batch was sent again.
    pub fn mark_in_flight(&mut self, sequence: u64, attempt: u32) {
        if let Some(tracked) = self.batches.get_mut(&sequence) {
            tracked.state = BatchState::InFlight { attempt };
        }
    }

    /// Record that a tracked batch failed and waits for a retry.
    pub fn mark_backoff(&mut self, sequence: u64, attempt: u32, until: Instant) {
        if let Some(tracked) = self.batches.get_mut(&sequence) {
            tracked.state = BatchState::Backoff { attempt, until };
        }
    }

    /// Stop tracking a batch (acked or failed for good) and hand back its
    /// callers' completions.
    pub fn release(&mut self, sequence: u64) -> Vec<Completion> {
        self.batches
            .remove(&sequence)
            .map(|tracked| tracked.completions)
            .unwrap_or_default()
    }

    pub fn state(&self, sequence: u64) -> Option<BatchState> {
        self.batches.get(&sequence).map(|tracked| tracked.state)
    }

    /// Sequences currently tracked, oldest first.
    pub fn sequences(&self) -> Vec<u64> {
        self.batches.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Completions of every tracked batch, oldest batch first.
    pub(crate) fn drain(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.batches)
            .into_values()
            .flat_map(|tracked| tracked.completions)
            .collect()
    }
}
