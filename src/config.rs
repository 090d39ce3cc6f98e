//! Worker process configuration.
//!
//! Defaults come from the environment (`TQ_REDIS_URL`) and are overridden by
//! CLI flags in the entry point.

use std::time::Duration;

/// Environment variable naming the backing store.
pub const REDIS_URL_ENV: &str = "TQ_REDIS_URL";

/// Fallback store URL when nothing is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";

/// Queue name used when none is given.
pub const DEFAULT_QUEUE: &str = "main";

/// Resolved configuration for one worker process.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Logical queue names the worker serves.
    pub queues: Vec<String>,
    /// Backing store URL.
    pub url: String,
    /// Poll latency override for scheduled/failed workers.
    pub latency: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_string()],
            url: std::env::var(REDIS_URL_ENV).unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            latency: None,
        }
    }
}

impl Config {
    /// Parse a comma-separated queue list, dropping empty segments.
    pub fn with_queue_list(mut self, list: &str) -> Self {
        let queues: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        if !queues.is_empty() {
            self.queues = queues;
        }
        self
    }

    /// Override the store URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Override the poll latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The first queue, for single-queue workers.
    pub fn primary_queue(&self) -> &str {
        &self.queues[0]
    }
}
