//! Command-line interface for posts-publisher
//!
//! # Usage Examples
//!
//! ```bash
//! # Publish five messages with the defaults
//! posts-publisher --broker localhost:9093 --topic posts
//!
//! # Bigger run with a longer linger
//! posts-publisher --count 1000 --linger 50ms --batch-size 65536
//!
//! # Dry run against the in-memory transport
//! posts-publisher --dry-run
//! ```

use anyhow::Context;
use clap::Parser;
use kafka_transport::KafkaTransport;
use posts_publisher::{publish_posts, Cli};
use reliable_producer::{MemoryTransport, Producer, Transport};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.producer.producer_config()?;

    let transport: Arc<dyn Transport> = if cli.publish.dry_run {
        tracing::info!("Dry run: publishing to an in-memory transport");
        Arc::new(MemoryTransport::new(1))
    } else {
        Arc::new(KafkaTransport::new(&config).context("Failed to create Kafka transport")?)
    };

    let producer = Producer::new(config, transport).context("Failed to create producer")?;
    let published = publish_posts(&producer, &cli.publish).await;

    // Drain before exiting, even when publishing stopped early
    let report = producer.close().await;
    let summary = published?;

    if report.undelivered > 0 {
        anyhow::bail!(
            "{} messages were still undelivered at shutdown",
            report.undelivered
        );
    }
    if summary.failed > 0 {
        anyhow::bail!(
            "{} of {} messages failed to deliver",
            summary.failed,
            cli.publish.count
        );
    }
    Ok(())
}
