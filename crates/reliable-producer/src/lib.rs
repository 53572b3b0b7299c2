//! Reliable batching producer for partitioned topics
//!
//! Applications enqueue records and get back a handle that resolves once the
//! record is acknowledged or has failed for good. Behind the handle, records
//! wait in bounded per-partition queues, are cut into size- and time-bounded
//! batches, and are sent through a [`Transport`] with retries and per-partition
//! ordering.
//!
//! # Architecture
//!
//! - `RecordBuffer` - bounded FIFO queue per topic partition
//! - `Batcher` - cuts batches when the size limit or linger time is reached
//! - `AckTracker` - owns the callers' completions of every unresolved batch
//! - `RetryScheduler` - exponential backoff and attempt accounting
//! - `Transport` - the broker session; `MemoryTransport` for dry runs and tests
//!
//! Each partition gets its own worker task owning its batcher, tracker and
//! retry scheduler. With `max_in_flight_per_partition = 1` (the default) a
//! partition has at most one unresolved batch, so records are delivered in
//! enqueue order even across retries.

mod batch;
mod buffer;
pub mod config;
mod error;
mod memory;
mod partitioner;
mod producer;
mod record;
mod retry;
mod stats;
mod tracker;
mod transport;
mod worker;

#[cfg(test)]
mod tests;

// Re-export configuration types
pub use config::{Acks, BufferFullMode, ProducerConfig};

// Re-export error types
pub use error::{ProducerError, Result};

// Re-export record and batch types
pub use batch::{BatchId, RecordBatch};
pub use record::{Record, RecordMetadata, TopicPartition};

// Re-export delivery machinery
pub use partitioner::{murmur2, partition_for_key, Partitioner};
pub use retry::{Backoff, RetryDecision, RetryScheduler};
pub use tracker::{AckTracker, BatchState};

// Re-export the producer
pub use producer::{DeliveryHandle, Producer, ShutdownReport};
pub use stats::ProducerStatsSnapshot;

// Re-export transports
pub use memory::{MemoryTransport, SentBatch};
pub use transport::{DeliveryOutcome, DeliveryResult, Transport};
