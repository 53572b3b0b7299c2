//! Producer configuration.
//!
//! The configuration is an explicit value handed to [`crate::Producer::new`]
//! and validated once there. Durations are expressed in milliseconds, the
//! same unit Kafka clients use for `linger.ms`, `request.timeout.ms` and
//! friends, so a TOML file reads naturally:
//!
//! ```toml
//! broker_addresses = ["localhost:9093"]
//! acks = "all"
//! max_retries = 5
//! request_timeout_ms = 20000
//! batch_size_bytes = 16384
//! linger_ms = 10
//! ```

use crate::error::{ProducerError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Acknowledgment level requested from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    /// Fire and forget.
    None,
    /// The partition leader has written the batch.
    Leader,
    /// All in-sync replicas have written the batch.
    #[default]
    All,
}

impl Acks {
    /// Value of the `acks` property understood by Kafka clients.
    pub fn as_kafka_str(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

/// What `enqueue` does when the partition queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferFullMode {
    /// Fail immediately with [`ProducerError::BufferFull`].
    #[default]
    Reject,
    /// Wait up to `buffer_block_timeout_ms` for space, then fail.
    Block,
}

/// Configuration for the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Broker addresses (`host:port`)
    ///
    /// Only handed to the transport; the core never connects by itself.
    pub broker_addresses: Vec<String>,
    /// Acknowledgment level
    pub acks: Acks,
    /// Number of times a failed batch is re-sent before its records fail.
    ///
    /// A batch is attempted at most `max_retries + 1` times.
    pub max_retries: u32,
    /// Upper bound for a single send attempt
    pub request_timeout_ms: u64,
    /// Maximum accumulated payload+key bytes per batch
    ///
    /// A batch is flushed as soon as this many bytes are queued, and never
    /// holds more than this. Records larger than this are rejected.
    pub batch_size_bytes: usize,
    /// Maximum time the first record of a pending batch waits for company
    pub linger_ms: u64,
    /// Backoff before the first retry; doubles on each subsequent retry
    pub retry_backoff_ms: u64,
    /// Cap for the retry backoff
    pub retry_backoff_max_ms: u64,
    /// Maximum number of unbatched records per partition
    pub buffer_capacity: usize,
    /// Behaviour of `enqueue` on a full partition queue
    pub buffer_full: BufferFullMode,
    /// How long a blocking `enqueue` waits for space
    pub buffer_block_timeout_ms: u64,
    /// Batches of one partition that may await acknowledgment at once
    ///
    /// `1` keeps enqueue order end-to-end, including across retries.
    /// Larger values pipeline sends and give that guarantee up.
    pub max_in_flight_per_partition: usize,
    /// Upper bound for `flush` to see every accepted record resolved
    pub delivery_timeout_ms: u64,
    /// Grace period `close` allows in-flight work before giving up on it
    pub shutdown_grace_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            broker_addresses: vec!["localhost:9092".to_string()],
            acks: Acks::All,
            max_retries: 5,
            request_timeout_ms: 20_000,
            batch_size_bytes: 16_384,
            linger_ms: 10,
            retry_backoff_ms: 100,
            retry_backoff_max_ms: 1_000,
            buffer_capacity: 10_000,
            buffer_full: BufferFullMode::Reject,
            buffer_block_timeout_ms: 60_000,
            max_in_flight_per_partition: 1,
            delivery_timeout_ms: 120_000,
            shutdown_grace_ms: 30_000,
        }
    }
}

impl ProducerConfig {
    /// Check the configuration for values the producer cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.broker_addresses.is_empty() {
            return Err(invalid("at least one broker address is required"));
        }
        if let Some(blank) = self
            .broker_addresses
            .iter()
            .position(|addr| addr.trim().is_empty())
        {
            return Err(invalid(format!("broker address #{blank} is empty")));
        }
        if self.batch_size_bytes == 0 {
            return Err(invalid("batch_size_bytes must be greater than zero"));
        }
        if self.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity must be greater than zero"));
        }
        if self.max_in_flight_per_partition == 0 {
            return Err(invalid(
                "max_in_flight_per_partition must be greater than zero",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms must be greater than zero"));
        }
        if self.delivery_timeout_ms == 0 {
            return Err(invalid("delivery_timeout_ms must be greater than zero"));
        }
        if self.retry_backoff_max_ms < self.retry_backoff_ms {
            return Err(invalid(format!(
                "retry_backoff_max_ms ({}) is smaller than retry_backoff_ms ({})",
                self.retry_backoff_max_ms, self.retry_backoff_ms
            )));
        }
        Ok(())
    }

    /// Whether per-partition enqueue order is guaranteed end-to-end.
    pub fn strict_ordering(&self) -> bool {
        self.max_in_flight_per_partition == 1
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn buffer_block_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_block_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn invalid(message: impl Into<String>) -> ProducerError {
    ProducerError::Configuration(message.into())
}
