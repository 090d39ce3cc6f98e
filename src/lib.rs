//! tq - a Redis-backed distributed job queue.
//!
//! Producers enqueue units of deferred work (immediate or time-scheduled)
//! onto named queues; a pool of worker processes dequeues and executes them
//! against the shared backing store. Scheduled jobs recur over weekday
//! cycles, daily timeslots, or hourly intervals, localized to their own
//! timezone, and can fall back to an alternate callable when a run starts
//! too late.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tq::{ExecInfo, JobSpec, Queue, RedisStore, Worker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RedisStore::connect("redis://127.0.0.1:6379/").await?);
//!
//! // Producer side: enqueue immediate and scheduled work.
//! let queue = Queue::new(Arc::clone(&store), "main");
//! queue.enqueue(JobSpec::new("send-report").arg("--weekly")).await?;
//! queue
//!     .enqueue(JobSpec::new("rotate-logs").exec_info(
//!         ExecInfo::default()
//!             .with_days([0u8, 3])
//!             .with_timeslots(["02:30"])
//!             .with_timezone("Europe/Berlin"),
//!     ))
//!     .await?;
//!
//! // Worker side: run until a termination signal arrives.
//! Worker::new(store, ["main"]).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod queue;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use core::job::{Job, JobError, JobSpec, JOB_TTL};
pub use core::schedule::{
    is_late, next_run_after_completion, next_run_after_schedule, ExecInfo, ScheduleError,
    LATENESS_THRESHOLD,
};
pub use core::types::{JobId, JobStatus};
pub use queue::{Queue, QueueError};
pub use storage::{MemoryStore, RedisStore, Store, StoreError, Tx};
pub use worker::{
    FailedWorker, ScheduledWorker, Shutdown, Worker, WorkerError, WorkerState, DEFAULT_LATENCY,
    FAILED_WORKER_LATENCY,
};
