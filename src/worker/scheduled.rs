//! Scheduled and failed-job workers.
//!
//! A [`ScheduledWorker`] polls one queue's scheduled set for due jobs,
//! decides fallback-vs-primary execution by lateness, and reschedules or
//! retires each job after it runs. A [`FailedWorker`] is the same engine at
//! a slower cadence, pointed at a queue of jobs awaiting delayed retry.
//!
//! Polling is a read, not a claim: two scheduled workers on the same queue
//! can race and double-process a due job. Run at most one scheduled or
//! failed worker per logical queue unless execution is idempotent.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::{Shutdown, Worker, WorkerError, WorkerState};
use crate::core::job::Job;
use crate::core::schedule;
use crate::core::types::JobId;
use crate::queue::Queue;
use crate::storage::{Store, Tx};

/// Default poll latency of a scheduled worker.
pub const DEFAULT_LATENCY: Duration = Duration::from_secs(1);

/// Default poll latency of a failed worker.
pub const FAILED_WORKER_LATENCY: Duration = Duration::from_secs(30);

/// Polls a queue's scheduled set and runs each due job.
pub struct ScheduledWorker<S> {
    worker: Worker<S>,
    store: Arc<S>,
    queue: Queue<S>,
    latency: Duration,
    shutdown: Arc<Shutdown>,
}

impl<S: Store + 'static> ScheduledWorker<S> {
    /// Create a scheduled worker over one logical queue.
    pub fn new(store: Arc<S>, queue_name: impl Into<String>) -> Self {
        let name = queue_name.into();
        let worker =
            Worker::new(Arc::clone(&store), [name.clone()]).with_name("ScheduledWorker");
        let queue = Queue::new(Arc::clone(&store), name);
        let shutdown = worker.shutdown_handle();
        Self {
            worker,
            store,
            queue,
            latency: DEFAULT_LATENCY,
            shutdown,
        }
    }

    /// Override the poll latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Override the worker name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.worker = self.worker.with_name(name);
        self
    }

    /// The poll latency.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// The current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shutdown.state()
    }

    /// Handle for requesting shutdown from tests or other tasks.
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Main loop: fetch due jobs, run and reschedule or retire each, sleep
    /// the poll latency, repeat until shutdown.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        self.worker.install_signal_handlers()?;
        info!(
            worker = %self.worker.name(),
            queue = %self.queue.name(),
            latency_secs = self.latency.as_secs(),
            "listening for due jobs"
        );

        while self.shutdown.state() == WorkerState::Running {
            let (query_at, due) = self.queue.get_scheduled().await?;

            if due.is_empty() {
                if !self.wait().await {
                    break;
                }
                continue;
            }

            info!(queue = %self.queue.name(), count = due.len(), "found due jobs");
            for id in due {
                self.handle_due_job(&id, query_at).await?;
            }

            if !self.wait().await {
                break;
            }
        }

        self.shutdown.mark_stopped();
        info!(worker = %self.worker.name(), "worker stopped");
        Ok(())
    }

    /// Run one due job, then either move it to its next instant or retire
    /// it from the scheduled set with a retention TTL.
    async fn handle_due_job(&self, id: &JobId, query_at: i64) -> Result<(), WorkerError> {
        let Some(mut job) = Job::fetch(self.store.as_ref(), id).await? else {
            // Absent record means nothing to do, but the member must go or
            // the poll loop would spin on it forever.
            warn!(job_id = %id, "scheduled member has no record, dropping it");
            self.queue.delete_scheduled(id).await?;
            return Ok(());
        };

        let run_fallback = job
            .scheduled_at()
            .map(|due_at| schedule::is_late(due_at, query_at))
            .unwrap_or(false);

        // The next run is computed independently of this run's outcome; a
        // failure is already logged and the record stays Queued.
        self.worker.perform_job(&mut job, run_fallback).await?;

        if !job.refresh(self.store.as_ref()).await? {
            self.queue.delete_scheduled(id).await?;
            return Ok(());
        }

        let next_run = match schedule::next_run_after_completion(job.exec_info(), Utc::now()) {
            Ok(next_run) => next_run,
            Err(err) => {
                error!(
                    job_id = %job.id(),
                    error = %err,
                    "cannot compute next run, retiring job"
                );
                self.retire(&mut job).await?;
                return Ok(());
            }
        };

        match next_run {
            Some(next_run) if job.is_reschedulable() => {
                job.exec_info_mut().ran_at = Some(query_at);
                let mut tx = Tx::new();
                self.queue.requeue_scheduled(&mut job, next_run, &mut tx)?;
                self.store.apply(tx).await?;
                info!(job_id = %job.id(), next_run, "job rescheduled");
            }
            _ => {
                self.retire(&mut job).await?;
                info!(job_id = %job.id(), "job removed from queue");
            }
        }

        Ok(())
    }

    /// Drop the job from the scheduled set and start its retention TTL,
    /// atomically. The record stays queryable until the TTL expires.
    async fn retire(&self, job: &mut Job) -> Result<(), WorkerError> {
        let mut tx = Tx::new();
        self.queue.delete_scheduled_into(job.id(), &mut tx);
        job.expire_into(&mut tx);
        Ok(self.store.apply(tx).await?)
    }

    /// Sleep the poll latency; `false` when shutdown interrupted the nap.
    async fn wait(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.latency) => true,
            _ = self.shutdown.requested() => false,
        }
    }
}

/// A [`ScheduledWorker`] at a slower cadence for jobs requiring delayed
/// retry after an earlier failure. No additional state.
pub struct FailedWorker<S> {
    inner: ScheduledWorker<S>,
}

impl<S: Store + 'static> FailedWorker<S> {
    /// Create a failed worker over one logical queue.
    pub fn new(store: Arc<S>, queue_name: impl Into<String>) -> Self {
        Self {
            inner: ScheduledWorker::new(store, queue_name)
                .with_name("FailedWorker")
                .with_latency(FAILED_WORKER_LATENCY),
        }
    }

    /// The poll latency.
    pub fn latency(&self) -> Duration {
        self.inner.latency()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.inner.state()
    }

    /// Handle for requesting shutdown from tests or other tasks.
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.inner.shutdown_handle()
    }

    /// Run the polling loop to completion.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        self.inner.run().await
    }
}
