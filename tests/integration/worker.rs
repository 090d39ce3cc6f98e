//! Worker execution integration tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tq::{JobSpec, JobStatus, MemoryStore, Queue, Worker, WorkerState};

use crate::common::{wait_for_status, wait_until};

#[tokio::test]
async fn test_worker_processes_jobs_until_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    let mut worker = Worker::new(Arc::clone(&store), ["main"]);
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    let first = queue
        .enqueue(JobSpec::new("echo").arg("one"))
        .await
        .unwrap();
    let second = queue
        .enqueue(JobSpec::new("echo").arg("two"))
        .await
        .unwrap();

    let mut done = wait_for_status(
        &store,
        first.id(),
        JobStatus::Finished,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(done.result(&*store).await.unwrap(), Some(json!("one")));

    wait_for_status(
        &store,
        second.id(),
        JobStatus::Finished,
        Duration::from_secs(5),
    )
    .await;

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
    assert_eq!(shutdown.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_worker_serves_multiple_queues() {
    let store = Arc::new(MemoryStore::new());
    let mail = Queue::new(Arc::clone(&store), "mail");
    let reports = Queue::new(Arc::clone(&store), "reports");

    let mut worker = Worker::new(Arc::clone(&store), ["mail", "reports"]);
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    let a = mail.enqueue(JobSpec::new("echo").arg("a")).await.unwrap();
    let b = reports
        .enqueue(JobSpec::new("echo").arg("b"))
        .await
        .unwrap();

    wait_for_status(&store, a.id(), JobStatus::Finished, Duration::from_secs(5)).await;
    wait_for_status(&store, b.id(), JobStatus::Finished, Duration::from_secs(5)).await;

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_job_stays_queued_for_follow_up() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    let mut worker = Worker::new(Arc::clone(&store), ["main"]);
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    let failing = queue.enqueue(JobSpec::new("false")).await.unwrap();
    // A marker job after the failing one: once it finishes, the failing job
    // has definitely been attempted.
    let marker = queue.enqueue(JobSpec::new("echo")).await.unwrap();
    wait_for_status(
        &store,
        marker.id(),
        JobStatus::Finished,
        Duration::from_secs(5),
    )
    .await;

    let attempted = wait_for_status(
        &store,
        failing.id(),
        JobStatus::Queued,
        Duration::from_secs(1),
    )
    .await;
    assert_eq!(attempted.status(), Some(JobStatus::Queued));

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_worker_skips_vanished_records() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    // An id with no backing record, then a real job behind it.
    {
        use tq::Store;
        store.list_push("queue:main", "ghost-id").await.unwrap();
    }

    let mut worker = Worker::new(Arc::clone(&store), ["main"]);
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    let real = queue.enqueue(JobSpec::new("echo")).await.unwrap();
    wait_for_status(
        &store,
        real.id(),
        JobStatus::Finished,
        Duration::from_secs(5),
    )
    .await;

    wait_until(
        || store.list_len("queue:main").unwrap() == 0,
        Duration::from_secs(1),
        "queue to drain",
    )
    .await;

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}
