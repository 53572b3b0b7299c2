//! The session the producer core sends batches through.
//!
//! Implementations only move bytes: one call per batch, one result per call.
//! Timeouts, retries and ordering are handled by the core.

use crate::batch::{BatchId, RecordBatch};
use crate::error::Result;
use crate::record::TopicPartition;
use async_trait::async_trait;

/// How a send attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The broker acknowledged every record of the batch at the configured
    /// acks level. `base_offset` is the offset of the first record when the
    /// broker reports one.
    Acked { base_offset: Option<i64> },
    /// The attempt failed; the reason is kept for logs and terminal errors.
    Failed(String),
    /// No answer within the request timeout.
    TimedOut,
}

/// Result of one send attempt of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub batch_id: BatchId,
    pub destination: TopicPartition,
    pub outcome: DeliveryOutcome,
}

impl DeliveryResult {
    pub fn acked(batch: &RecordBatch, base_offset: Option<i64>) -> Self {
        Self::new(batch, DeliveryOutcome::Acked { base_offset })
    }

    pub fn failed(batch: &RecordBatch, reason: impl Into<String>) -> Self {
        Self::new(batch, DeliveryOutcome::Failed(reason.into()))
    }

    pub fn timed_out(batch: &RecordBatch) -> Self {
        Self::new(batch, DeliveryOutcome::TimedOut)
    }

    fn new(batch: &RecordBatch, outcome: DeliveryOutcome) -> Self {
        Self {
            batch_id: batch.id(),
            destination: batch.destination().clone(),
            outcome,
        }
    }

    pub fn is_acked(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Acked { .. })
    }
}

/// A connection to the broker cluster.
///
/// `send` may be called concurrently for different partitions and, when more
/// than one batch per partition may be in flight, for the same partition.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one batch and report how it went. Never retries on its own.
    async fn send(&self, batch: &RecordBatch) -> DeliveryResult;

    /// Number of partitions of `topic`.
    async fn partition_count(&self, topic: &str) -> Result<u32>;
}
