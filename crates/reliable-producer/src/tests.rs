//! End-to-end producer behaviour against scripted transports.

use crate::{
    partition_for_key, BufferFullMode, DeliveryResult, MemoryTransport, Producer, ProducerConfig,
    ProducerError, Record, RecordBatch, RecordMetadata, Result, TopicPartition, Transport,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Scripted transport
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Ack,
    Fail,
    /// Report that the broker did not answer in time
    TimedOut,
    /// Never answer; the producer's request timeout fires
    Hang,
}

#[derive(Debug, Clone)]
struct SendLog {
    sequence: u64,
    attempt: u32,
    payloads: Vec<String>,
    step: Step,
    at: Instant,
}

/// Answers sends with the scripted steps in order, then acks.
struct ScriptedTransport {
    partitions: u32,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    log: Mutex<Vec<SendLog>>,
}

impl ScriptedTransport {
    fn new(script: &[Step]) -> Arc<Self> {
        Self::with_fallback(script, Step::Ack)
    }

    fn with_fallback(script: &[Step], fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            partitions: 1,
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
            log: Mutex::new(Vec::new()),
        })
    }

    fn log(&self) -> Vec<SendLog> {
        self.log.lock().unwrap().clone()
    }

    /// Payloads of acknowledged sends, in the order the broker accepted them.
    fn acked_payloads(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|entry| entry.step == Step::Ack)
            .flat_map(|entry| entry.payloads)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, batch: &RecordBatch) -> DeliveryResult {
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        let acked_before: usize = self
            .log()
            .iter()
            .filter(|entry| entry.step == Step::Ack)
            .map(|entry| entry.payloads.len())
            .sum();
        self.log.lock().unwrap().push(SendLog {
            sequence: batch.sequence(),
            attempt: batch.attempts(),
            payloads: batch
                .records()
                .iter()
                .map(|r| String::from_utf8_lossy(r.payload()).into_owned())
                .collect(),
            step,
            at: Instant::now(),
        });

        match step {
            Step::Ack => DeliveryResult::acked(batch, Some(acked_before as i64)),
            Step::Fail => DeliveryResult::failed(batch, "NOT_ENOUGH_REPLICAS"),
            Step::TimedOut => DeliveryResult::timed_out(batch),
            Step::Hang => std::future::pending().await,
        }
    }

    async fn partition_count(&self, _topic: &str) -> Result<u32> {
        Ok(self.partitions)
    }
}

fn config() -> ProducerConfig {
    ProducerConfig {
        linger_ms: 0,
        retry_backoff_ms: 100,
        retry_backoff_max_ms: 1_000,
        request_timeout_ms: 1_000,
        ..Default::default()
    }
}

fn record(payload: &str) -> Record {
    Record::new(
        TopicPartition::new("posts", 0),
        None,
        Bytes::from(payload.to_string()),
        None,
    )
}

// ============================================================================
// Ordering and retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_keeps_partition_order() {
    let transport = ScriptedTransport::new(&[Step::Fail]);
    let producer = Producer::new(config(), transport.clone()).unwrap();

    let mut handles = Vec::new();
    for i in 0..3 {
        handles.push(producer.enqueue_record(record(&format!("r{i}"))).await.unwrap());
    }
    let mut offsets = Vec::new();
    for handle in handles {
        offsets.push(handle.await.unwrap().offset.unwrap());
    }

    assert_eq!(transport.acked_payloads(), vec!["r0", "r1", "r2"]);
    assert_eq!(offsets, vec![0, 1, 2]);

    let log = transport.log();
    assert_eq!(log[0].step, Step::Fail);
    assert_eq!(log[0].attempt, 1);
    // Nothing overtakes the failed batch
    assert_eq!(log[1].sequence, log[0].sequence);
    assert_eq!(log[1].attempt, 2);
    assert!(log[1].at - log[0].at >= Duration::from_millis(100));

    let stats = producer.stats();
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.records_delivered, 3);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_sends_exhaust_retries() {
    let transport = ScriptedTransport::with_fallback(&[], Step::Hang);
    let producer = Producer::new(
        ProducerConfig {
            max_retries: 2,
            ..config()
        },
        transport.clone(),
    )
    .unwrap();

    let err = producer
        .enqueue_record(record("doomed"))
        .await
        .unwrap()
        .await
        .unwrap_err();

    match err {
        ProducerError::TerminalSendFailure { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected terminal failure, got {other:?}"),
    }
    assert_eq!(transport.log().len(), 3);

    let stats = producer.stats();
    assert_eq!(stats.records_failed, 1);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.records_pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_batch_fails_every_record() {
    let transport = ScriptedTransport::with_fallback(&[], Step::TimedOut);
    let producer = Producer::new(
        ProducerConfig {
            max_retries: 2,
            linger_ms: 50,
            ..config()
        },
        transport.clone(),
    )
    .unwrap();

    let started = Instant::now();
    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(producer.enqueue_record(record(&format!("t{i}"))).await.unwrap());
    }
    for handle in handles {
        match handle.await {
            Err(ProducerError::TerminalSendFailure { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected terminal failure, got {other:?}"),
        }
    }

    let log = transport.log();
    assert_eq!(log.len(), 3);
    for (i, entry) in log.iter().enumerate() {
        assert_eq!(entry.step, Step::TimedOut);
        assert_eq!(entry.attempt, i as u32 + 1);
        assert_eq!(entry.sequence, log[0].sequence);
        assert_eq!(entry.payloads.len(), 5);
    }
    // Linger, then backoffs of 100ms and 200ms
    assert_eq!(log[0].at - started, Duration::from_millis(50));
    assert_eq!(log[1].at - log[0].at, Duration::from_millis(100));
    assert_eq!(log[2].at - log[1].at, Duration::from_millis(200));

    let stats = producer.stats();
    assert_eq!(stats.records_failed, 5);
    assert_eq!(stats.batches_sent, 3);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.records_pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_does_not_block_later_batches_for_good() {
    let transport = ScriptedTransport::new(&[Step::Fail]);
    let producer = Producer::new(
        ProducerConfig {
            max_retries: 0,
            ..config()
        },
        transport.clone(),
    )
    .unwrap();

    let first = send_one(&producer, "lost").await;
    assert!(matches!(
        first,
        Err(ProducerError::TerminalSendFailure { attempts: 1, .. })
    ));
    let second = send_one(&producer, "kept").await.unwrap();
    assert_eq!(second.attempts, 1);
}

async fn send_one(producer: &Producer, payload: &str) -> Result<RecordMetadata> {
    producer.enqueue_record(record(payload)).await?.await
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_linger_collects_small_records_into_one_batch() {
    let transport = ScriptedTransport::new(&[]);
    let producer = Producer::new(
        ProducerConfig {
            linger_ms: 50,
            ..config()
        },
        transport.clone(),
    )
    .unwrap();

    let started = Instant::now();
    let mut handles = Vec::new();
    for i in 0..5 {
        handles.push(producer.enqueue_record(record(&format!("m{i}"))).await.unwrap());
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let log = transport.log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].payloads.len(), 5);
    assert_eq!(log[0].at - started, Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_lone_record_is_sent_when_linger_expires() {
    let transport = ScriptedTransport::new(&[]);
    let producer = Producer::new(
        ProducerConfig {
            linger_ms: 50,
            ..config()
        },
        transport.clone(),
    )
    .unwrap();

    let started = Instant::now();
    let metadata = producer
        .enqueue_record(record("alone"))
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(metadata.offset, Some(0));

    let log = transport.log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].payloads, vec!["alone"]);
    assert_eq!(log[0].at - started, Duration::from_millis(50));

    // Nothing else goes out once the queue is empty
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.log().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batches_never_exceed_size_limit() {
    let transport = ScriptedTransport::new(&[]);
    let producer = Producer::new(
        ProducerConfig {
            batch_size_bytes: 30,
            linger_ms: 60_000,
            ..config()
        },
        transport.clone(),
    )
    .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        // 10 bytes each
        handles.push(
            producer
                .enqueue_record(record(&format!("record-{i:03}")))
                .await
                .unwrap(),
        );
    }
    producer.flush().await.unwrap();

    let sizes: Vec<usize> = transport.log().iter().map(|e| e.payloads.len()).collect();
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_delivery_handle_pending_until_acked() {
    let transport = ScriptedTransport::new(&[]);
    let producer = Producer::new(
        ProducerConfig {
            linger_ms: 60_000,
            ..config()
        },
        transport,
    )
    .unwrap();

    let mut handle =
        tokio_test::task::spawn(producer.enqueue_record(record("later")).await.unwrap());
    tokio_test::assert_pending!(handle.poll());

    producer.flush().await.unwrap();
    assert!(handle.is_woken());
    let metadata = tokio_test::assert_ready_ok!(handle.poll());
    assert_eq!(metadata.offset, Some(0));
    assert_eq!(metadata.topic, "posts");
}

#[tokio::test]
async fn test_flush_with_nothing_buffered_returns_immediately() {
    let producer = Producer::new(config(), Arc::new(MemoryTransport::new(1))).unwrap();
    producer.flush().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flush_times_out_when_broker_never_answers() {
    let transport = ScriptedTransport::with_fallback(&[], Step::Hang);
    let producer = Producer::new(
        ProducerConfig {
            request_timeout_ms: 60_000,
            max_retries: 10,
            delivery_timeout_ms: 500,
            ..config()
        },
        transport,
    )
    .unwrap();

    let _handle = producer.enqueue_record(record("stuck")).await.unwrap();
    assert_eq!(
        producer.flush().await.unwrap_err(),
        ProducerError::FlushTimeout(Duration::from_millis(500))
    );
}

// ============================================================================
// Backpressure
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reject_mode_reports_buffer_full() {
    let transport = ScriptedTransport::new(&[]);
    let producer = Producer::new(
        ProducerConfig {
            buffer_capacity: 2,
            linger_ms: 60_000,
            ..config()
        },
        transport,
    )
    .unwrap();

    let _a = producer.enqueue_record(record("a")).await.unwrap();
    let _b = producer.enqueue_record(record("b")).await.unwrap();
    let err = producer.enqueue_record(record("c")).await.unwrap_err();

    assert_eq!(
        err,
        ProducerError::BufferFull {
            topic: "posts".to_string(),
            partition: 0
        }
    );
    assert!(err.is_retriable());
    assert_eq!(producer.stats().records_rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_block_mode_waits_for_the_worker_to_drain() {
    let transport = ScriptedTransport::new(&[]);
    let producer = Producer::new(
        ProducerConfig {
            buffer_capacity: 1,
            buffer_full: BufferFullMode::Block,
            buffer_block_timeout_ms: 5_000,
            ..config()
        },
        transport.clone(),
    )
    .unwrap();

    let first = producer.enqueue_record(record("first")).await.unwrap();
    let second = producer.enqueue_record(record("second")).await.unwrap();
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(transport.acked_payloads(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_oversized_record_is_rejected() {
    let producer = Producer::new(
        ProducerConfig {
            batch_size_bytes: 4,
            ..config()
        },
        Arc::new(MemoryTransport::new(1)),
    )
    .unwrap();

    let err = producer.enqueue_record(record("too long")).await.unwrap_err();
    assert_eq!(err, ProducerError::RecordTooLarge { size: 8, max: 4 });
}

#[tokio::test]
async fn test_unknown_partition_is_rejected() {
    let producer = Producer::new(config(), Arc::new(MemoryTransport::new(2))).unwrap();
    let record = Record::new(
        TopicPartition::new("posts", 7),
        None,
        Bytes::from_static(b"x"),
        None,
    );

    let err = producer.enqueue_record(record).await.unwrap_err();
    assert_eq!(
        err,
        ProducerError::UnknownPartition {
            topic: "posts".to_string(),
            partition: 7
        }
    );
}

#[test]
fn test_invalid_config_is_refused() {
    let result = Producer::new(
        ProducerConfig {
            batch_size_bytes: 0,
            ..config()
        },
        Arc::new(MemoryTransport::new(1)),
    );
    assert!(matches!(result, Err(ProducerError::Configuration(_))));
}

// ============================================================================
// Partitioning
// ============================================================================

#[tokio::test]
async fn test_same_key_always_lands_on_same_partition() {
    let transport = Arc::new(MemoryTransport::new(4));
    let producer = Producer::new(config(), transport.clone()).unwrap();
    let expected = partition_for_key(b"user_001", 4);

    for i in 0..5 {
        let metadata = producer
            .send(
                "posts",
                Some(Bytes::from_static(b"user_001")),
                Bytes::from(format!("post {i}")),
                None,
            )
            .await
            .unwrap();
        assert_eq!(metadata.partition, expected);
        assert_eq!(metadata.offset, Some(i));
    }

    assert_eq!(
        transport
            .records_for(&TopicPartition::new("posts", expected))
            .len(),
        5
    );
    assert_eq!(
        producer.partitions(),
        vec![TopicPartition::new("posts", expected)]
    );
}

#[tokio::test]
async fn test_keyless_records_spread_over_partitions() {
    let producer = Producer::new(config(), Arc::new(MemoryTransport::new(3))).unwrap();

    let mut partitions = Vec::new();
    for i in 0..3 {
        let metadata = producer
            .send("posts", None, Bytes::from(format!("post {i}")), None)
            .await
            .unwrap();
        partitions.push(metadata.partition);
    }
    partitions.sort();
    assert_eq!(partitions, vec![0, 1, 2]);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_close_delivers_buffered_records() {
    let transport = ScriptedTransport::new(&[]);
    let producer = Producer::new(
        ProducerConfig {
            linger_ms: 60_000,
            ..config()
        },
        transport.clone(),
    )
    .unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        handles.push(producer.enqueue_record(record(&format!("c{i}"))).await.unwrap());
    }

    let report = producer.close().await;
    assert!(report.drained);
    assert_eq!(report.undelivered, 0);
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(transport.acked_payloads(), vec!["c0", "c1", "c2", "c3"]);
}

#[tokio::test(start_paused = true)]
async fn test_close_after_grace_fails_outstanding_records() {
    let transport = ScriptedTransport::with_fallback(&[], Step::Hang);
    let producer = Producer::new(
        ProducerConfig {
            request_timeout_ms: 60_000,
            ..config()
        },
        transport,
    )
    .unwrap();

    let mut handles = Vec::new();
    for i in 0..3 {
        handles.push(producer.enqueue_record(record(&format!("s{i}"))).await.unwrap());
    }

    let report = producer.close_with_grace(Duration::from_millis(100)).await;
    assert!(!report.drained);
    assert_eq!(report.undelivered, 3);
    for handle in handles {
        assert_eq!(handle.await.unwrap_err(), ProducerError::Shutdown);
    }

    let err = producer.enqueue_record(record("late")).await.unwrap_err();
    assert_eq!(err, ProducerError::Closed);

    // Closing twice is harmless
    assert_eq!(producer.close().await.undelivered, 0);
}
