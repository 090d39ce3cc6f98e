//! Graceful shutdown integration tests.
//!
//! Shutdown is immediate: the worker stops accepting work and exits without
//! draining queued-but-not-yet-dequeued jobs. Requesting it repeatedly must
//! stay harmless.

use std::sync::Arc;
use std::time::Duration;

use tq::{JobSpec, JobStatus, MemoryStore, Queue, ScheduledWorker, Worker, WorkerState};

#[tokio::test]
async fn test_shutdown_unblocks_idle_worker() {
    let store = Arc::new(MemoryStore::new());
    let mut worker = Worker::new(store, ["main"]);
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    // The worker is parked on an empty queue; a stop request must still
    // take effect promptly.
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_stop();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should exit promptly")
        .unwrap()
        .unwrap();
    assert_eq!(shutdown.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_double_shutdown_request_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let mut worker = Worker::new(store, ["main"]);
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    shutdown.request_stop();
    shutdown.request_stop();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker should exit promptly")
        .unwrap()
        .unwrap();

    // Requests after exit are equally harmless.
    shutdown.request_stop();
    assert_eq!(shutdown.state(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_shutdown_does_not_drain_pending_jobs() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    let mut worker = Worker::new(Arc::clone(&store), ["main"]);
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    shutdown.request_stop();
    handle.await.unwrap().unwrap();

    // Work enqueued once the worker is gone stays queued.
    let job = queue.enqueue(JobSpec::new("echo")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.list_len("queue:main").unwrap(), 1);
    let stored = tq::Job::fetch(&*store, job.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Queued));
}

#[tokio::test]
async fn test_scheduled_worker_stops_mid_nap() {
    let store = Arc::new(MemoryStore::new());
    let mut worker =
        ScheduledWorker::new(store, "main").with_latency(Duration::from_secs(60));
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    // The worker is asleep for a minute; shutdown must cut the nap short.
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_stop();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduled worker should exit promptly")
        .unwrap()
        .unwrap();
    assert_eq!(shutdown.state(), WorkerState::Stopped);
}
