//! Named queues over the backing store.
//!
//! One logical queue owns two views under a single store key: an ordered
//! list of immediate job ids (FIFO) and a score-ordered set of scheduled job
//! ids (score = due-at epoch seconds). The two shapes never collide by type,
//! so they share the key.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use crate::core::job::{Job, JobError, JobSpec};
use crate::core::schedule::{self, ScheduleError};
use crate::core::types::{JobId, JobStatus};
use crate::storage::{Store, StoreError, Tx};

/// Store-key prefix for queues.
pub const KEY_PREFIX: &str = "queue:";

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A job record failed to serialize, load, or persist.
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Schedule metadata could not produce a first run.
    #[error("schedule error: {0}")]
    Schedule(#[from] ScheduleError),
}

/// A named channel of deferred work.
pub struct Queue<S> {
    store: Arc<S>,
    name: String,
    key: String,
}

impl<S> Clone for Queue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
            key: self.key.clone(),
        }
    }
}

impl<S: Store> Queue<S> {
    /// Create a handle for the logical queue `name` (store key
    /// `queue:<name>`).
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Self {
        let name = name.into();
        let key = format!("{}{}", KEY_PREFIX, name);
        Self { store, name, key }
    }

    /// The logical queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The derived store key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Build, register and persist a job in one atomic transaction.
    ///
    /// Schedule metadata without an explicit `scheduled_at` gets its first
    /// due instant computed here. Scheduled jobs join the sorted set at
    /// score = due-at; immediate jobs join the FIFO list. The record is
    /// persisted with status `Queued` and returned to the caller.
    pub async fn enqueue(&self, spec: JobSpec) -> Result<Job, QueueError> {
        let mut job = Job::create(spec);

        if job.exec_info().scheduled_at.is_none() && job.exec_info().has_schedule() {
            let first = schedule::next_run_after_schedule(job.exec_info(), Utc::now())?;
            job.exec_info_mut().scheduled_at = Some(first);
        }

        let mut tx = Tx::new();
        match job.scheduled_at() {
            Some(score) => tx.zset_add(self.key.as_str(), score, job.id().as_str()),
            None => tx.list_push(self.key.as_str(), job.id().as_str()),
        }
        job.set_status_into(JobStatus::Queued, &mut tx)?;
        job.write_into(&mut tx)?;
        self.store.apply(tx).await?;

        Ok(job)
    }

    /// Block until any of the given queues' immediate lists has an entry,
    /// pop exactly one, and fetch its record.
    ///
    /// The pop is atomic across workers: at most one receives a given id.
    /// Returns `None` when the popped id no longer resolves to a record.
    pub async fn dequeue_any(store: &S, queues: &[Queue<S>]) -> Result<Option<Job>, QueueError> {
        let keys: Vec<String> = queues.iter().map(|q| q.key.clone()).collect();
        let (_key, member) = store.list_pop_any(&keys).await?;
        Ok(Job::fetch(store, &JobId::new(member)).await?)
    }

    /// Every scheduled-set member due at or before now, with the query
    /// timestamp. Members are not removed; that is the caller's
    /// responsibility after successful handling.
    pub async fn get_scheduled(&self) -> Result<(i64, Vec<JobId>), QueueError> {
        let now = Utc::now().timestamp();
        let members = self.store.zset_range_by_score(&self.key, now).await?;
        Ok((now, members.into_iter().map(JobId::new).collect()))
    }

    /// Move a job's scheduled-set score to `next_run` and persist the
    /// updated metadata, composed inside the caller's transaction.
    pub fn requeue_scheduled(
        &self,
        job: &mut Job,
        next_run: i64,
        tx: &mut Tx,
    ) -> Result<(), QueueError> {
        tx.zset_add(self.key.as_str(), next_run, job.id().as_str());
        job.exec_info_mut().scheduled_at = Some(next_run);
        job.write_into(tx)?;
        Ok(())
    }

    /// Append removal of a scheduled-set member to a transaction.
    pub fn delete_scheduled_into(&self, id: &JobId, tx: &mut Tx) {
        tx.zset_remove(self.key.as_str(), id.as_str());
    }

    /// Remove a scheduled-set member in a transaction of its own.
    pub async fn delete_scheduled(&self, id: &JobId) -> Result<(), QueueError> {
        let mut tx = Tx::new();
        self.delete_scheduled_into(id, &mut tx);
        Ok(self.store.apply(tx).await?)
    }
}
