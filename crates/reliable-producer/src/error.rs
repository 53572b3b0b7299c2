//! Error types for the producer core.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the producer.
///
/// `Clone` because a terminal failure of one batch is reported to every
/// caller that enqueued a record into it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// The partition queue is at capacity. The caller may back off and retry.
    #[error("Buffer full for partition {topic}/{partition}")]
    BufferFull { topic: String, partition: u32 },

    #[error("Record of {size} bytes exceeds the batch size limit of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Unknown partition {partition} for topic '{topic}'")]
    UnknownPartition { topic: String, partition: u32 },

    /// A send attempt failed and will be retried. Only ever logged.
    #[error("Transient send failure: {0}")]
    TransientSendFailure(String),

    #[error("Send failed after {attempts} attempts: {reason}")]
    TerminalSendFailure { attempts: u32, reason: String },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Producer is closed")]
    Closed,

    #[error("Record was not delivered before shutdown")]
    Shutdown,

    #[error("Flush did not complete within {0:?}")]
    FlushTimeout(Duration),
}

impl ProducerError {
    /// Whether the caller can reasonably retry the same operation later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ProducerError::BufferFull { .. }
                | ProducerError::TransientSendFailure(_)
                | ProducerError::FlushTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProducerError>;
