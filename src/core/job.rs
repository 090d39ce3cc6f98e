//! Job record: the persisted unit of deferred work.
//!
//! A job carries an opaque reference to the work to perform (a program the
//! worker host can execute), invocation parameters, schedule metadata, and
//! run bookkeeping. It persists as a single hash record whose `data`,
//! `result` and `state` fields are opaque blobs produced and consumed only
//! here, so the storage format stays an internal concern.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

use crate::core::schedule::ExecInfo;
use crate::core::types::{JobId, JobStatus};
use crate::storage::{Store, StoreError, Tx};

/// Retention TTL for records with no further runs due, in seconds.
pub const JOB_TTL: i64 = 60 * 60 * 5;

/// Prefix for environment variables derived from kwargs.
const ENV_PREFIX: &str = "TQ_";

const FIELD_ID: &str = "id";
const FIELD_DATA: &str = "data";
const FIELD_RESULT: &str = "result";
const FIELD_STATE: &str = "state";

/// Errors raised by job persistence and execution.
#[derive(Debug, Error)]
pub enum JobError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A blob failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A fetched hash record lacked a required field.
    #[error("malformed job record: missing field {0}")]
    MissingField(&'static str),

    /// The callable's program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The callable ran and reported failure.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },
}

/// Everything needed to build a job record, fluent-style.
///
/// ```
/// use tq::{ExecInfo, JobSpec};
///
/// let spec = JobSpec::new("send-report")
///     .arg("--weekly")
///     .kwarg("region", "emea")
///     .fallback("send-report-digest")
///     .exec_info(
///         ExecInfo::default()
///             .with_days([0u8, 2])
///             .with_timeslots(["09:00", "17:00"])
///             .with_timezone("UTC"),
///     );
/// ```
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    method: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    fallback: Option<String>,
    exec_info: ExecInfo,
    fb_info: ExecInfo,
}

impl JobSpec {
    /// Start a spec for the given primary callable reference.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Append several positional arguments.
    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Set the fallback callable reference.
    pub fn fallback(mut self, method: impl Into<String>) -> Self {
        self.fallback = Some(method.into());
        self
    }

    /// Set the scheduling metadata.
    pub fn exec_info(mut self, info: ExecInfo) -> Self {
        self.exec_info = info;
        self
    }

    /// Set the fallback bookkeeping metadata.
    pub fn fallback_info(mut self, info: ExecInfo) -> Self {
        self.fb_info = info;
        self
    }
}

/// Serialized form of the `data` blob.
#[derive(Serialize, Deserialize)]
struct JobData {
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    method: String,
    fallback: Option<String>,
    exec_info: ExecInfo,
    fb_info: ExecInfo,
}

/// The unit of deferred work.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    method: String,
    fallback: Option<String>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    exec_info: ExecInfo,
    fb_info: ExecInfo,
    result: Option<Value>,
    status: Option<JobStatus>,
}

impl Job {
    /// Construct a fresh record with a new identifier. Does not persist.
    pub fn create(spec: JobSpec) -> Self {
        Self {
            id: JobId::generate(),
            method: spec.method,
            fallback: spec.fallback,
            args: spec.args,
            kwargs: spec.kwargs,
            exec_info: spec.exec_info,
            fb_info: spec.fb_info,
            result: None,
            status: None,
        }
    }

    fn empty(id: JobId) -> Self {
        Self {
            id,
            method: String::new(),
            fallback: None,
            args: Vec::new(),
            kwargs: Map::new(),
            exec_info: ExecInfo::default(),
            fb_info: ExecInfo::default(),
            result: None,
            status: None,
        }
    }

    /// The job identifier.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// The primary callable reference.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The fallback callable reference, if any.
    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Keyword arguments.
    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    /// Scheduling metadata.
    pub fn exec_info(&self) -> &ExecInfo {
        &self.exec_info
    }

    /// Mutable scheduling metadata.
    pub fn exec_info_mut(&mut self) -> &mut ExecInfo {
        &mut self.exec_info
    }

    /// Fallback bookkeeping metadata.
    pub fn fb_info(&self) -> &ExecInfo {
        &self.fb_info
    }

    /// Current status, if one has been assigned.
    pub fn status(&self) -> Option<JobStatus> {
        self.status
    }

    /// Due-at instant for scheduled jobs.
    pub fn scheduled_at(&self) -> Option<i64> {
        self.exec_info.scheduled_at
    }

    /// Whether the schedule metadata implies recurrence.
    pub fn is_reschedulable(&self) -> bool {
        self.exec_info.is_recurring()
    }

    /// Load a record by identifier. `None` when no such record exists.
    pub async fn fetch<S: Store>(store: &S, id: &JobId) -> Result<Option<Job>, JobError> {
        let mut job = Job::empty(id.clone());
        if job.refresh(store).await? {
            Ok(Some(job))
        } else {
            Ok(None)
        }
    }

    /// Reload data, result and status from the store, overwriting in-memory
    /// state. `false` when the record no longer exists.
    pub async fn refresh<S: Store>(&mut self, store: &S) -> Result<bool, JobError> {
        let fields = store.hash_get_all(self.id.as_str()).await?;
        if fields.is_empty() {
            return Ok(false);
        }

        let blob = fields
            .get(FIELD_DATA)
            .ok_or(JobError::MissingField(FIELD_DATA))?;
        let data: JobData = serde_json::from_slice(blob)?;
        self.args = data.args;
        self.kwargs = data.kwargs;
        self.method = data.method;
        self.fallback = data.fallback;
        self.exec_info = data.exec_info;
        self.fb_info = data.fb_info;

        self.result = match fields.get(FIELD_RESULT) {
            Some(blob) => serde_json::from_slice(blob)?,
            None => None,
        };
        self.status = match fields.get(FIELD_STATE) {
            Some(blob) => serde_json::from_slice(blob)?,
            None => None,
        };

        Ok(true)
    }

    fn data_blob(&self) -> Result<Vec<u8>, JobError> {
        let data = JobData {
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
            method: self.method.clone(),
            fallback: self.fallback.clone(),
            exec_info: self.exec_info.clone(),
            fb_info: self.fb_info.clone(),
        };
        Ok(serde_json::to_vec(&data)?)
    }

    /// Append the full record write to a transaction: one atomic hash write
    /// covering id, data, result and state.
    pub fn write_into(&self, tx: &mut Tx) -> Result<(), JobError> {
        tx.hash_set(
            self.id.as_str(),
            vec![
                (FIELD_ID.to_string(), self.id.as_str().as_bytes().to_vec()),
                (FIELD_DATA.to_string(), self.data_blob()?),
                (FIELD_RESULT.to_string(), serde_json::to_vec(&self.result)?),
                (FIELD_STATE.to_string(), serde_json::to_vec(&self.status)?),
            ],
        );
        Ok(())
    }

    /// Persist the full record in a transaction of its own.
    pub async fn save<S: Store>(&self, store: &S) -> Result<(), JobError> {
        let mut tx = Tx::new();
        self.write_into(&mut tx)?;
        Ok(store.apply(tx).await?)
    }

    /// Append a status update to a transaction.
    pub fn set_status_into(&mut self, status: JobStatus, tx: &mut Tx) -> Result<(), JobError> {
        self.status = Some(status);
        tx.hash_set(
            self.id.as_str(),
            vec![(FIELD_STATE.to_string(), serde_json::to_vec(&self.status)?)],
        );
        Ok(())
    }

    /// Persist a status update in a transaction of its own.
    pub async fn set_status<S: Store>(
        &mut self,
        store: &S,
        status: JobStatus,
    ) -> Result<(), JobError> {
        let mut tx = Tx::new();
        self.set_status_into(status, &mut tx)?;
        Ok(store.apply(tx).await?)
    }

    /// Append the retention TTL to a transaction.
    pub fn expire_into(&self, tx: &mut Tx) {
        tx.expire(self.id.as_str(), JOB_TTL);
    }

    /// Set the retention TTL in a transaction of its own.
    pub async fn expire<S: Store>(&self, store: &S) -> Result<(), JobError> {
        let mut tx = Tx::new();
        self.expire_into(&mut tx);
        Ok(store.apply(tx).await?)
    }

    /// Append record deletion to a transaction.
    pub fn delete_into(&self, tx: &mut Tx) {
        tx.delete(self.id.as_str());
    }

    /// Delete the record in a transaction of its own.
    pub async fn delete<S: Store>(&self, store: &S) -> Result<(), JobError> {
        let mut tx = Tx::new();
        self.delete_into(&mut tx);
        Ok(store.apply(tx).await?)
    }

    /// The last run's return value, loading it from the store when not
    /// cached locally.
    pub async fn result<S: Store>(&mut self, store: &S) -> Result<Option<Value>, JobError> {
        if self.result.is_none() {
            if let Some(blob) = store.hash_get(self.id.as_str(), FIELD_RESULT).await? {
                self.result = serde_json::from_slice(&blob)?;
            }
        }
        Ok(self.result.clone())
    }

    /// Execute the job's callable and store its return value as the result.
    ///
    /// Runs the fallback callable instead of the primary when `run_fallback`
    /// is set and a fallback exists. The callable executes as a child
    /// process: argv from `args`, `TQ_*` environment from `kwargs`, stdout
    /// captured as the result (parsed as JSON when possible). Failures
    /// propagate to the caller; nothing is caught here.
    pub async fn perform(&mut self, run_fallback: bool) -> Result<Value, JobError> {
        let program = if run_fallback {
            self.fallback.as_deref().unwrap_or(&self.method)
        } else {
            &self.method
        };

        let mut cmd = Command::new(program);
        for arg in &self.args {
            cmd.arg(value_to_arg(arg));
        }
        for (key, value) in &self.kwargs {
            cmd.env(
                format!("{}{}", ENV_PREFIX, key.to_uppercase()),
                value_to_arg(value),
            );
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let program = program.to_string();
        let output = cmd
            .output()
            .await
            .map_err(|source| JobError::Spawn { program, source })?;

        if !output.status.success() {
            return Err(JobError::CommandFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        let value = serde_json::from_str(trimmed)
            .unwrap_or_else(|_| Value::String(trimmed.to_string()));
        self.result = Some(value.clone());
        Ok(value)
    }
}

/// Render an argument value for argv/env: strings pass through raw,
/// everything else as JSON text.
fn value_to_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
