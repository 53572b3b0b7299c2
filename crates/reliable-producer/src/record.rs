//! Records and their delivery metadata.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;

/// A topic partition, the unit ordering guarantees apply to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// An application record bound for one partition.
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    destination: TopicPartition,
    key: Option<Bytes>,
    payload: Bytes,
    timestamp: DateTime<Utc>,
}

impl Record {
    /// Create a record. A missing timestamp defaults to now.
    pub fn new(
        destination: TopicPartition,
        key: Option<Bytes>,
        payload: Bytes,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            destination,
            key,
            payload,
            timestamp: timestamp.unwrap_or_else(Utc::now),
        }
    }

    pub fn destination(&self) -> &TopicPartition {
        &self.destination
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Bytes this record contributes to a batch (payload plus key).
    pub fn size(&self) -> usize {
        self.payload.len() + self.key.as_ref().map(|k| k.len()).unwrap_or(0)
    }
}

/// Metadata returned to the caller once its record is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: u32,
    /// Offset assigned by the broker, when the transport reports one
    pub offset: Option<i64>,
    pub timestamp: DateTime<Utc>,
    /// Send attempts the record's batch needed
    pub attempts: u32,
}
