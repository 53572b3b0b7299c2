use clap::Parser;
use posts_publisher::{publish_posts, AcksArg, Cli, PostMessage, PublishOpts, PublishSummary};
use reliable_producer::{Acks, MemoryTransport, Producer, ProducerConfig, TopicPartition};
use std::io::Write;
use std::sync::Arc;

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["posts-publisher"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[test]
fn test_defaults_match_publisher_settings() {
    let cli = parse(&["--broker", "localhost:9093", "--topic", "posts"]);
    assert_eq!(cli.publish.topic, "posts");
    assert_eq!(cli.publish.count, 5);
    assert_eq!(cli.publish.sender, "buildingminds");
    assert!(!cli.publish.dry_run);

    let config = cli.producer.producer_config().unwrap();
    assert_eq!(config.broker_addresses, vec!["localhost:9093"]);
    assert_eq!(config.max_retries, 5);
    assert_eq!(config.acks, Acks::All);
    assert_eq!(config.request_timeout_ms, 20_000);
    assert_eq!(config.batch_size_bytes, 16_384);
    assert_eq!(config.linger_ms, 10);
}

#[test]
fn test_flags_override_defaults() {
    let cli = parse(&[
        "--broker",
        "kafka-1:9092,kafka-2:9092",
        "--acks",
        "1",
        "--retries",
        "2",
        "--request-timeout",
        "5s",
        "--batch-size",
        "1024",
        "--linger",
        "50ms",
        "--count",
        "3",
        "--dry-run",
    ]);
    assert_eq!(cli.producer.acks, Some(AcksArg::Leader));
    assert_eq!(cli.publish.count, 3);
    assert!(cli.publish.dry_run);

    let config = cli.producer.producer_config().unwrap();
    assert_eq!(config.broker_addresses, vec!["kafka-1:9092", "kafka-2:9092"]);
    assert_eq!(config.acks, Acks::Leader);
    assert_eq!(config.max_retries, 2);
    assert_eq!(config.request_timeout_ms, 5_000);
    assert_eq!(config.batch_size_bytes, 1024);
    assert_eq!(config.linger_ms, 50);
}

#[test]
fn test_config_file_with_flag_override() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
broker_addresses = ["file-broker:9092"]
acks = "leader"
batch_size_bytes = 4096
linger_ms = 100
buffer_full = "block"
"#
    )
    .unwrap();
    let path = file.path().to_str().unwrap();

    let cli = parse(&["--config", path, "--broker", "flag-broker:9092", "--linger", "25"]);
    let config = cli.producer.producer_config().unwrap();

    assert_eq!(config.broker_addresses, vec!["flag-broker:9092"]);
    assert_eq!(config.acks, Acks::Leader);
    assert_eq!(config.batch_size_bytes, 4096);
    assert_eq!(config.linger_ms, 25);
    assert_eq!(config.buffer_full, reliable_producer::BufferFullMode::Block);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let cli = parse(&["--config", "/nonexistent/producer.toml"]);
    let err = cli.producer.producer_config().unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}

#[test]
fn test_invalid_flags_are_rejected() {
    let cli = parse(&["--broker", "localhost:9093", "--batch-size", "0"]);
    assert!(cli.producer.producer_config().is_err());

    let result = Cli::try_parse_from(["posts-publisher", "--linger", "soon"]);
    assert!(result.is_err());
    let result = Cli::try_parse_from(["posts-publisher", "--acks", "some"]);
    assert!(result.is_err());
}

#[test]
fn test_post_message_shape() {
    let message = PostMessage::new("buildingminds", 3);
    let json: serde_json::Value = serde_json::from_slice(&message.to_json().unwrap()).unwrap();

    assert_eq!(json["sender"], "buildingminds");
    assert_eq!(json["content"], "message 3");
    let created_at = json["created_at"].as_str().unwrap();
    assert!(chrono::NaiveDateTime::parse_from_str(created_at, "%Y-%m-%dT%H:%M:%S%.f").is_ok());
}

fn publish_opts(count: u32) -> PublishOpts {
    PublishOpts {
        topic: "posts".to_string(),
        count,
        sender: "buildingminds".to_string(),
        dry_run: true,
    }
}

#[tokio::test]
async fn test_publish_posts_delivers_in_order() {
    let transport = Arc::new(MemoryTransport::new(1));
    let producer = Producer::new(ProducerConfig::default(), transport.clone()).unwrap();

    let summary = publish_posts(&producer, &publish_opts(5)).await.unwrap();
    assert_eq!(
        summary,
        PublishSummary {
            delivered: 5,
            failed: 0
        }
    );

    let contents: Vec<String> = transport
        .records_for(&TopicPartition::new("posts", 0))
        .iter()
        .map(|payload| {
            let message: PostMessage = serde_json::from_slice(payload).unwrap();
            message.content
        })
        .collect();
    assert_eq!(
        contents,
        vec!["message 0", "message 1", "message 2", "message 3", "message 4"]
    );

    let report = producer.close().await;
    assert!(report.drained);
    assert_eq!(report.undelivered, 0);
}

#[test]
fn test_publish_after_close_fails_to_enqueue() {
    tokio_test::block_on(async {
        let producer =
            Producer::new(ProducerConfig::default(), Arc::new(MemoryTransport::new(1))).unwrap();
        producer.close().await;

        let err = publish_posts(&producer, &publish_opts(1)).await.unwrap_err();
        assert!(format!("{err:#}").contains("Failed to enqueue message 0"));
    });
}
