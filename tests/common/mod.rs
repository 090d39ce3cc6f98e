//! Common test utilities shared across integration tests.

use std::time::Duration;

use tq::{Job, JobId, JobStatus, MemoryStore};

/// Wait for a job record to reach an expected status, polling the store.
///
/// More reliable than fixed sleeps since execution time can vary. Polls
/// every 10ms and panics after the timeout.
pub async fn wait_for_status(
    store: &MemoryStore,
    id: &JobId,
    expected: JobStatus,
    timeout: Duration,
) -> Job {
    let start = tokio::time::Instant::now();
    loop {
        if let Some(job) = Job::fetch(store, id).await.unwrap() {
            if job.status() == Some(expected) {
                return job;
            }
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for job {} to reach {:?}", id, expected);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until a condition over the store holds, polling every 10ms.
pub async fn wait_until<F>(mut condition: F, timeout: Duration, what: &str)
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
