//! tq - worker entry point.
//!
//! Usage:
//!   tq                          Run an immediate worker on queue `main`
//!   tq --queues main,mail       Run an immediate worker on several queues
//!   tq --scheduled              Run a scheduled worker on queue `main`
//!   tq --failed --queues retry  Run a failed worker on queue `retry`

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use tq::{Config, FailedWorker, RedisStore, ScheduledWorker, Worker};

/// tq - a Redis-backed distributed job queue worker
#[derive(Parser)]
#[command(name = "tq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Queues for the worker, separated by commas
    #[arg(long, default_value = tq::config::DEFAULT_QUEUE)]
    queues: String,

    /// Run a scheduled worker over the first queue's scheduled set
    #[arg(long, conflicts_with = "failed")]
    scheduled: bool,

    /// Run a failed worker over the first queue's scheduled set
    #[arg(long)]
    failed: bool,

    /// Backing store URL (defaults to $TQ_REDIS_URL, then localhost)
    #[arg(long)]
    url: Option<String>,

    /// Poll latency in seconds for scheduled/failed workers
    #[arg(long)]
    latency: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::default().with_queue_list(&cli.queues);
    if let Some(url) = cli.url {
        config = config.with_url(url);
    }
    if let Some(secs) = cli.latency {
        config = config.with_latency(Duration::from_secs(secs));
    }

    let store = Arc::new(RedisStore::connect(&config.url).await?);

    if cli.scheduled {
        info!(queue = config.primary_queue(), "starting scheduled worker");
        let mut worker = ScheduledWorker::new(store, config.primary_queue());
        if let Some(latency) = config.latency {
            worker = worker.with_latency(latency);
        }
        worker.run().await?;
    } else if cli.failed {
        info!(queue = config.primary_queue(), "starting failed worker");
        let mut worker = FailedWorker::new(store, config.primary_queue());
        worker.run().await?;
    } else {
        info!(queues = %cli.queues, "starting worker");
        Worker::new(store, config.queues.clone()).run().await?;
    }

    Ok(())
}
