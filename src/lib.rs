//! posts-publisher library
//!
//! Publishes JSON post messages to a Kafka topic through the
//! `reliable_producer` core. The binary is a thin wrapper: everything it does
//! lives here so it can be exercised against an in-memory transport.
//!
//! # CLI Usage
//!
//! ```bash
//! # Five messages to the `posts` topic on localhost:9093
//! posts-publisher
//!
//! # Broker and topic from the environment
//! KAFKA_BROKER_URL=kafka:9092 KAFKA_TOPIC=news posts-publisher --count 20
//!
//! # Tuning from a file, with a flag overriding it
//! posts-publisher --config producer.toml --linger 50ms
//!
//! # Without a broker
//! posts-publisher --dry-run
//! ```

use anyhow::Context;
use bytes::Bytes;
use clap::{Args, Parser, ValueEnum};
use reliable_producer::{Acks, Producer, ProducerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

pub mod config;
pub mod message;

use config::duration::parse_duration;
pub use message::PostMessage;

/// Broker used when no flag or config file names one.
pub const DEFAULT_BROKER: &str = "localhost:9093";

#[derive(Parser, Debug)]
#[command(name = "posts-publisher")]
#[command(about = "Publish post messages to a Kafka topic with acknowledgments and retries")]
#[command(long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub publish: PublishOpts,

    #[command(flatten)]
    pub producer: ProducerOpts,
}

#[derive(Args, Debug, Clone)]
pub struct PublishOpts {
    /// Topic to publish to
    #[arg(long, default_value = "posts", env = "KAFKA_TOPIC")]
    pub topic: String,

    /// Number of messages to publish
    #[arg(long, default_value_t = 5)]
    pub count: u32,

    /// Sender field of every message
    #[arg(long, default_value = "buildingminds")]
    pub sender: String,

    /// Use an in-memory transport instead of Kafka
    #[arg(long)]
    pub dry_run: bool,
}

/// Producer tuning. Every flag is optional so that a config file can supply
/// the value; a flag that is passed always wins over the file.
#[derive(Args, Debug, Clone, Default)]
pub struct ProducerOpts {
    /// Broker address (repeatable or comma-separated) [default: localhost:9093]
    #[arg(long = "broker", env = "KAFKA_BROKER_URL", value_delimiter = ',')]
    pub brokers: Vec<String>,

    /// Retries per batch after the first attempt [default: 5]
    #[arg(long)]
    pub retries: Option<u32>,

    /// Acknowledgment level [default: all]
    #[arg(long, value_enum)]
    pub acks: Option<AcksArg>,

    /// Request timeout, e.g. "20000", "20s" [default: 20000ms]
    #[arg(long, value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,

    /// Maximum batch size in bytes [default: 16384]
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// How long a batch waits for more records, e.g. "10ms" [default: 10ms]
    #[arg(long, value_parser = parse_duration)]
    pub linger: Option<Duration>,

    /// TOML file with a full producer configuration
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AcksArg {
    #[value(alias = "0")]
    None,
    #[value(alias = "1")]
    Leader,
    All,
}

impl From<AcksArg> for Acks {
    fn from(acks: AcksArg) -> Self {
        match acks {
            AcksArg::None => Acks::None,
            AcksArg::Leader => Acks::Leader,
            AcksArg::All => Acks::All,
        }
    }
}

impl ProducerOpts {
    /// Build the producer configuration: built-in defaults, then the config
    /// file if any, then explicitly passed flags.
    pub fn producer_config(&self) -> anyhow::Result<ProducerConfig> {
        let mut config = match &self.config {
            Some(path) => config::load_config_file(path)?,
            None => ProducerConfig {
                broker_addresses: vec![DEFAULT_BROKER.to_string()],
                ..Default::default()
            },
        };

        let brokers: Vec<String> = self
            .brokers
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if !brokers.is_empty() {
            config.broker_addresses = brokers;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(acks) = self.acks {
            config.acks = acks.into();
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout_ms = duration_millis(timeout);
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size_bytes = batch_size;
        }
        if let Some(linger) = self.linger {
            config.linger_ms = duration_millis(linger);
        }

        config.validate().context("Invalid producer configuration")?;
        Ok(config)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Outcome of a publishing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub delivered: u32,
    pub failed: u32,
}

/// Enqueue `opts.count` post messages, then wait for every delivery result.
///
/// Per-message failures are counted, not returned; an error means a message
/// could not even be enqueued.
pub async fn publish_posts(producer: &Producer, opts: &PublishOpts) -> anyhow::Result<PublishSummary> {
    let topic = opts.topic.as_str();
    let mut handles = Vec::with_capacity(opts.count as usize);

    for i in 0..opts.count {
        let message = PostMessage::new(&opts.sender, i);
        let payload = message
            .to_json()
            .with_context(|| format!("Failed to serialize message {i}"))?;
        let handle = producer
            .enqueue(topic, None, Bytes::from(payload), None)
            .await
            .with_context(|| format!("Failed to enqueue message {i}"))?;
        println!("message {i} sent to topic {topic}");
        handles.push((i, handle));
    }

    let mut summary = PublishSummary::default();
    for (i, handle) in handles {
        match handle.await {
            Ok(metadata) => {
                summary.delivered += 1;
                let offset = metadata
                    .offset
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "message {i} delivered to {}/{} at offset {offset} after {} attempt(s)",
                    metadata.topic, metadata.partition, metadata.attempts
                );
            }
            Err(e) => {
                summary.failed += 1;
                error!("message {i} was not delivered: {e}");
            }
        }
    }

    info!(
        "Published {} of {} messages to topic '{topic}'",
        summary.delivered, opts.count
    );
    Ok(summary)
}
