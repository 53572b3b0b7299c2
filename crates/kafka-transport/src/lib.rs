//! Kafka transport for `reliable-producer`
//!
//! Wraps an rdkafka `FutureProducer` configured so that the producer core
//! stays in charge of batching, retries and ordering: librdkafka is told not
//! to retry, not to linger and not to reorder. Each batch is produced to its
//! explicit partition and the transport reports one outcome for the whole
//! batch.

use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use reliable_producer::{DeliveryResult, ProducerConfig, ProducerError, RecordBatch, Transport};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum KafkaTransportError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<KafkaTransportError> for ProducerError {
    fn from(err: KafkaTransportError) -> Self {
        match err {
            KafkaTransportError::InvalidConfig(msg) => ProducerError::Configuration(msg),
            other => ProducerError::Transport(other.to_string()),
        }
    }
}

/// librdkafka settings for a producer whose batches are driven externally.
pub fn client_config(config: &ProducerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.broker_addresses.join(","))
        .set("acks", config.acks.as_kafka_str())
        .set("request.timeout.ms", config.request_timeout_ms.to_string())
        .set("message.timeout.ms", config.request_timeout_ms.to_string())
        // Retries and batching belong to the producer core
        .set("retries", "0")
        .set("linger.ms", "0")
        .set("enable.idempotence", "false")
        .set(
            "max.in.flight.requests.per.connection",
            config.max_in_flight_per_partition.to_string(),
        );
    client
}

/// Whether a Kafka error means the broker did not answer in time.
pub fn is_timeout(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::OperationTimedOut
        )
    )
}

pub struct KafkaTransport {
    producer: FutureProducer,
    request_timeout: Duration,
}

impl KafkaTransport {
    pub fn new(config: &ProducerConfig) -> Result<Self, KafkaTransportError> {
        config
            .validate()
            .map_err(|e| KafkaTransportError::InvalidConfig(e.to_string()))?;

        let producer: FutureProducer = client_config(config).create()?;
        info!(
            "Created Kafka producer for {}",
            config.broker_addresses.join(",")
        );

        Ok(Self {
            producer,
            request_timeout: config.request_timeout(),
        })
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn send(&self, batch: &RecordBatch) -> DeliveryResult {
        let destination = batch.destination();
        let Ok(partition) = i32::try_from(destination.partition) else {
            return DeliveryResult::failed(
                batch,
                format!("partition {} out of range", destination.partition),
            );
        };

        let deliveries = batch.records().iter().map(|record| {
            let mut message = FutureRecord::to(&destination.topic)
                .partition(partition)
                .payload(&record.payload()[..])
                .timestamp(record.timestamp().timestamp_millis());
            if let Some(key) = record.key() {
                message = message.key(&key[..]);
            }
            self.producer.send(message, self.request_timeout)
        });

        let mut base_offset = None;
        for (index, delivery) in join_all(deliveries).await.into_iter().enumerate() {
            match delivery {
                Ok((_, offset)) => {
                    if index == 0 {
                        base_offset = Some(offset);
                    }
                }
                Err((err, _)) if is_timeout(&err) => {
                    debug!("Batch {} of {destination} timed out: {err}", batch.sequence());
                    return DeliveryResult::timed_out(batch);
                }
                Err((err, _)) => return DeliveryResult::failed(batch, err.to_string()),
            }
        }
        DeliveryResult::acked(batch, base_offset)
    }

    async fn partition_count(&self, topic: &str) -> reliable_producer::Result<u32> {
        let producer = self.producer.clone();
        let topic_name = topic.to_string();
        let timeout = self.request_timeout;

        let metadata = tokio::task::spawn_blocking(move || {
            producer.client().fetch_metadata(Some(topic_name.as_str()), timeout)
        })
        .await
        .map_err(|e| ProducerError::Transport(format!("metadata lookup failed: {e}")))?
        .map_err(|e| ProducerError::Transport(format!("metadata lookup failed: {e}")))?;

        let Some(found) = metadata.topics().iter().find(|t| t.name() == topic) else {
            return Err(ProducerError::Transport(format!(
                "topic '{topic}' not found in metadata"
            )));
        };
        if let Some(err) = found.error() {
            return Err(ProducerError::Transport(format!(
                "topic '{topic}' metadata error: {err:?}"
            )));
        }
        Ok(found.partitions().len() as u32)
    }
}
