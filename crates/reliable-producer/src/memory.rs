//! In-process transport that acknowledges every batch.
//!
//! Used for dry runs and tests: it assigns offsets per partition the way a
//! broker would and keeps every batch it was handed.

use crate::batch::RecordBatch;
use crate::error::{ProducerError, Result};
use crate::record::TopicPartition;
use crate::transport::{DeliveryResult, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

/// A batch as it was seen by [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct SentBatch {
    pub destination: TopicPartition,
    pub sequence: u64,
    pub attempt: u32,
    pub base_offset: i64,
    pub payloads: Vec<Bytes>,
    pub sent_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryLog {
    next_offsets: HashMap<TopicPartition, i64>,
    batches: Vec<SentBatch>,
}

#[derive(Debug)]
pub struct MemoryTransport {
    partitions: u32,
    log: Mutex<MemoryLog>,
}

impl MemoryTransport {
    /// Every topic reports `partitions` partitions.
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions,
            log: Mutex::new(MemoryLog::default()),
        }
    }

    /// Every batch received, in arrival order.
    pub fn sent_batches(&self) -> Vec<SentBatch> {
        self.log
            .lock()
            .map(|log| log.batches.clone())
            .unwrap_or_default()
    }

    /// Payloads stored on one partition, in offset order.
    pub fn records_for(&self, destination: &TopicPartition) -> Vec<Bytes> {
        self.sent_batches()
            .into_iter()
            .filter(|b| &b.destination == destination)
            .flat_map(|b| b.payloads)
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, batch: &RecordBatch) -> DeliveryResult {
        let Ok(mut log) = self.log.lock() else {
            return DeliveryResult::failed(batch, "memory log poisoned");
        };
        let next = log
            .next_offsets
            .entry(batch.destination().clone())
            .or_insert(0);
        let base_offset = *next;
        *next += batch.len() as i64;

        log.batches.push(SentBatch {
            destination: batch.destination().clone(),
            sequence: batch.sequence(),
            attempt: batch.attempts(),
            base_offset,
            payloads: batch.records().iter().map(|r| r.payload().clone()).collect(),
            sent_at: Instant::now(),
        });
        DeliveryResult::acked(batch, Some(base_offset))
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        if self.partitions == 0 {
            return Err(ProducerError::Transport(format!(
                "topic '{topic}' has no partitions"
            )));
        }
        Ok(self.partitions)
    }
}
