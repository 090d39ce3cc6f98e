//! Worker execution model.
//!
//! Workers run as independent OS processes coordinating only through the
//! backing store; the store's atomic multi-key pop is the sole mutual
//! exclusion for immediate jobs. Each job's callable executes in a child
//! process, so a crashing or hanging job cannot corrupt the worker's state
//! or kill its loop; the worker always regains control with a
//! success/failure outcome. Horizontal scaling means more worker processes,
//! not concurrency within one.

mod scheduled;

pub use scheduled::{FailedWorker, ScheduledWorker, DEFAULT_LATENCY, FAILED_WORKER_LATENCY};

use chrono::Utc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::core::job::{Job, JobError};
use crate::core::types::JobStatus;
use crate::queue::{Queue, QueueError};
use crate::storage::{Store, StoreError, Tx};

/// Errors that stop a worker.
///
/// Anything that reaches here is fail-fast: the worker process exits and an
/// external supervisor restarts it.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A queue operation failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// A job persistence operation failed.
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Signal handlers could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Worker lifecycle: `Running` → `Stopping` → `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Accepting and executing work.
    Running,
    /// Shutdown requested; no further dequeues.
    Stopping,
    /// Run loop exited. There is no resumption.
    Stopped,
}

const STATE_RUNNING: u8 = 0;
const STATE_STOPPING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Shared shutdown switch between a worker's run loop and its signal task.
///
/// The flag flips synchronously inside [`Shutdown::request_stop`], before
/// any further dequeue can happen; the run loop observes it at each
/// iteration and while blocked on the store. Requesting a stop twice is
/// harmless.
pub struct Shutdown {
    state: AtomicU8,
    notify: Notify,
}

impl Shutdown {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_RUNNING),
            notify: Notify::new(),
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> WorkerState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => WorkerState::Running,
            STATE_STOPPING => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }

    /// Flip `Running` to `Stopping` and wake anything blocked on
    /// [`Shutdown::requested`]. Idempotent.
    pub fn request_stop(&self) {
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.notify.notify_waiters();
    }

    fn mark_stopped(&self) {
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
    }

    /// Whether a stop has been requested (or already completed).
    pub fn is_stopping(&self) -> bool {
        self.state.load(Ordering::SeqCst) != STATE_RUNNING
    }

    /// Resolve once a stop has been requested. Usable inside `select!`
    /// against a blocking dequeue.
    pub async fn requested(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_stopping() {
                return;
            }
            notified.await;
        }
    }
}

/// Polls one or more immediate queues and executes each dequeued job.
pub struct Worker<S> {
    store: Arc<S>,
    queues: Vec<Queue<S>>,
    name: String,
    shutdown: Arc<Shutdown>,
}

impl<S: Store + 'static> Worker<S> {
    /// Create a worker over the given logical queue names.
    pub fn new<I, N>(store: Arc<S>, queues: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let queues = queues
            .into_iter()
            .map(|name| Queue::new(Arc::clone(&store), name.into()))
            .collect();
        Self {
            store,
            queues,
            name: "Worker".to_string(),
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    /// Override the worker name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The worker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shutdown.state()
    }

    /// Handle for requesting shutdown from tests or other tasks.
    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Route SIGTERM/SIGINT to [`Shutdown::request_stop`].
    ///
    /// The handler task keeps listening, so repeated signals stay harmless.
    pub fn install_signal_handlers(&self) -> Result<(), WorkerError> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut term = signal(SignalKind::terminate()).map_err(WorkerError::Signal)?;
            let mut int = signal(SignalKind::interrupt()).map_err(WorkerError::Signal)?;
            let shutdown = Arc::clone(&self.shutdown);
            let name = self.name.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = term.recv() => {}
                        _ = int.recv() => {}
                    }
                    info!(worker = %name, "shutdown signal received");
                    shutdown.request_stop();
                }
            });
        }
        Ok(())
    }

    /// Main loop: block-dequeue one job across all configured queues,
    /// execute it, repeat until shutdown. Does not drain on shutdown;
    /// queued-but-not-dequeued jobs stay in the store.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        self.install_signal_handlers()?;
        let queues: Vec<&str> = self.queues.iter().map(Queue::name).collect();
        info!(
            worker = %self.name,
            pid = std::process::id(),
            ?queues,
            "worker started, waiting for jobs"
        );

        while self.shutdown.state() == WorkerState::Running {
            let dequeued = tokio::select! {
                popped = Queue::dequeue_any(self.store.as_ref(), &self.queues) => popped?,
                _ = self.shutdown.requested() => break,
            };

            // A popped id without a record means nothing to do.
            let Some(mut job) = dequeued else { continue };
            self.perform_job(&mut job, false).await?;
        }

        self.shutdown.mark_stopped();
        info!(worker = %self.name, "worker stopped");
        Ok(())
    }

    /// Execute one job in its isolated context and persist the outcome.
    ///
    /// Success marks the record `Finished` and saves it in one transaction.
    /// Execution failure is logged with the job id and leaves the record
    /// `Queued` for manual or scheduled follow-up; the return value reports
    /// which happened. Store failures propagate.
    pub async fn perform_job(
        &self,
        job: &mut Job,
        run_fallback: bool,
    ) -> Result<bool, WorkerError> {
        info!(worker = %self.name, job_id = %job.id(), run_fallback, "performing job");
        let started_at = Utc::now();

        // The callable runs in a child process; the supervising task turns
        // even a panic on this side of the boundary into an outcome instead
        // of a dead worker.
        let mut running = job.clone();
        let outcome = tokio::spawn(async move {
            let result = running.perform(run_fallback).await;
            (running, result)
        })
        .await;

        match outcome {
            Ok((updated, Ok(_))) => {
                *job = updated;
                let mut tx = Tx::new();
                job.set_status_into(JobStatus::Finished, &mut tx)?;
                job.write_into(&mut tx)?;
                self.store.apply(tx).await?;

                let took = Utc::now() - started_at;
                info!(
                    job_id = %job.id(),
                    took_ms = took.num_milliseconds(),
                    "successfully performed job"
                );
                Ok(true)
            }
            Ok((updated, Err(err))) => {
                *job = updated;
                error!(job_id = %job.id(), error = %err, "failed to perform job");
                Ok(false)
            }
            Err(join_err) => {
                error!(job_id = %job.id(), error = %join_err, "job execution aborted");
                Ok(false)
            }
        }
    }
}
