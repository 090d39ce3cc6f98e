//! Scheduled and failed worker integration tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tq::{ExecInfo, FailedWorker, JobSpec, JobStatus, MemoryStore, Queue, ScheduledWorker};

use crate::common::{wait_for_status, wait_until};

fn yesterday() -> NaiveDate {
    (Utc::now() - chrono::Duration::days(1)).date_naive()
}

#[tokio::test]
async fn test_recurring_job_is_rescheduled_after_run() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    let due = Utc::now().timestamp() - 10;
    let job = queue
        .enqueue(JobSpec::new("echo").arg("tick").exec_info(
            ExecInfo::default().with_every_hour(1).with_scheduled_at(due),
        ))
        .await
        .unwrap();

    let mut worker =
        ScheduledWorker::new(Arc::clone(&store), "main").with_latency(Duration::from_millis(10));
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    wait_for_status(&store, job.id(), JobStatus::Finished, Duration::from_secs(5)).await;

    // The job is never removed from the scheduled set; its score moves one
    // hour forward and the handling instant is recorded.
    wait_until(
        || {
            store.zset_score("queue:main", job.id().as_str()).unwrap() == Some(due + 3600)
        },
        Duration::from_secs(5),
        "job to be rescheduled",
    )
    .await;

    let stored = tq::Job::fetch(&*store, job.id()).await.unwrap().unwrap();
    assert_eq!(stored.scheduled_at(), Some(due + 3600));
    assert!(stored.exec_info().ran_at.is_some());

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_one_shot_job_is_retired_after_run() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    let job = queue
        .enqueue(
            JobSpec::new("echo").exec_info(
                ExecInfo::default()
                    .with_date(yesterday())
                    .with_timeslots(["00:00"])
                    .with_timezone("UTC"),
            ),
        )
        .await
        .unwrap();
    assert!(!job.is_reschedulable());

    let mut worker =
        ScheduledWorker::new(Arc::clone(&store), "main").with_latency(Duration::from_millis(10));
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    wait_for_status(&store, job.id(), JobStatus::Finished, Duration::from_secs(5)).await;
    wait_until(
        || {
            store
                .zset_score("queue:main", job.id().as_str())
                .unwrap()
                .is_none()
        },
        Duration::from_secs(5),
        "job to leave the scheduled set",
    )
    .await;

    // Retired, not deleted: the record stays queryable until its TTL.
    assert!(tq::Job::fetch(&*store, job.id()).await.unwrap().is_some());

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_late_job_runs_fallback() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    // Due well past the lateness threshold: the primary would fail, so a
    // Finished status proves the fallback ran instead.
    let job = queue
        .enqueue(
            JobSpec::new("false").fallback("echo").exec_info(
                ExecInfo::default()
                    .with_date(yesterday())
                    .with_timeslots(["00:00"])
                    .with_timezone("UTC")
                    .with_scheduled_at(Utc::now().timestamp() - 600),
            ),
        )
        .await
        .unwrap();

    let mut worker =
        ScheduledWorker::new(Arc::clone(&store), "main").with_latency(Duration::from_millis(10));
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    wait_for_status(&store, job.id(), JobStatus::Finished, Duration::from_secs(5)).await;

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_on_time_job_runs_primary() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    // Due just now, within the grace window: the failing primary runs, the
    // job is retired still Queued.
    let job = queue
        .enqueue(
            JobSpec::new("false").fallback("echo").exec_info(
                ExecInfo::default()
                    .with_date(yesterday())
                    .with_timeslots(["00:00"])
                    .with_timezone("UTC")
                    .with_scheduled_at(Utc::now().timestamp() - 10),
            ),
        )
        .await
        .unwrap();

    let mut worker =
        ScheduledWorker::new(Arc::clone(&store), "main").with_latency(Duration::from_millis(10));
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    wait_until(
        || {
            store
                .zset_score("queue:main", job.id().as_str())
                .unwrap()
                .is_none()
        },
        Duration::from_secs(5),
        "job to be retired",
    )
    .await;

    let stored = tq::Job::fetch(&*store, job.id()).await.unwrap().unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Queued));

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unschedulable_metadata_retires_job() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "main");

    // Recurring weekday metadata without a timezone: the run itself works,
    // but the next-run computation fails and retires the job.
    let job = queue
        .enqueue(
            JobSpec::new("echo").exec_info(
                ExecInfo::default()
                    .with_days([0u8, 1, 2, 3, 4, 5, 6])
                    .with_timeslots(["09:00"])
                    .with_scheduled_at(Utc::now().timestamp() - 10),
            ),
        )
        .await
        .unwrap();

    let mut worker =
        ScheduledWorker::new(Arc::clone(&store), "main").with_latency(Duration::from_millis(10));
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    wait_until(
        || {
            store
                .zset_score("queue:main", job.id().as_str())
                .unwrap()
                .is_none()
        },
        Duration::from_secs(5),
        "job to be retired",
    )
    .await;

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stale_scheduled_member_is_dropped() {
    let store = Arc::new(MemoryStore::new());

    // A scheduled-set member whose record is gone (expired retention).
    {
        use tq::{Store, Tx};
        let mut tx = Tx::new();
        tx.zset_add("queue:main", Utc::now().timestamp() - 10, "ghost-id");
        store.apply(tx).await.unwrap();
    }

    let mut worker =
        ScheduledWorker::new(Arc::clone(&store), "main").with_latency(Duration::from_millis(10));
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    wait_until(
        || store.zset_score("queue:main", "ghost-id").unwrap().is_none(),
        Duration::from_secs(5),
        "stale member to be dropped",
    )
    .await;

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_worker_handles_due_jobs() {
    let store = Arc::new(MemoryStore::new());
    let queue = Queue::new(Arc::clone(&store), "retry");

    let job = queue
        .enqueue(JobSpec::new("echo").arg("again").exec_info(
            ExecInfo::default()
                .with_every_hour(1)
                .with_scheduled_at(Utc::now().timestamp() - 10),
        ))
        .await
        .unwrap();

    let mut worker = FailedWorker::new(Arc::clone(&store), "retry");
    assert_eq!(worker.latency(), Duration::from_secs(30));
    let shutdown = worker.shutdown_handle();
    let handle = tokio::spawn(async move { worker.run().await });

    // The first poll happens before the first 30s nap.
    wait_for_status(&store, job.id(), JobStatus::Finished, Duration::from_secs(5)).await;

    shutdown.request_stop();
    handle.await.unwrap().unwrap();
}
