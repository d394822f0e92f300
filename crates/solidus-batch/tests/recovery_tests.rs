//! Orphaned task recovery

mod common;

use chrono::{Duration, Utc};
use common::{pending_task, MemoryTaskStore};
use serde_json::json;
use solidus_batch::tasks::{recover_orphans, TaskStatus, TaskStore, DEFAULT_LEASE_SECS};

fn processing(store: &MemoryTaskStore, worker: &str, heartbeat_age: Option<Duration>, started_age: Duration) -> uuid::Uuid {
    let now = Utc::now();
    let mut task = pending_task("asset_processing", json!({}), 5, now - started_age);
    task.status = TaskStatus::Processing;
    task.attempts = 1;
    task.worker_id = Some(worker.to_string());
    task.started_at = Some(now - started_age);
    task.heartbeat_at = heartbeat_age.map(|age| now - age);
    let id = task.task_id;
    store.put(task);
    id
}

#[tokio::test]
async fn test_stale_processing_tasks_are_failed() {
    let store = MemoryTaskStore::new();
    let lease = Duration::seconds(DEFAULT_LEASE_SECS);

    let stale = processing(&store, "host-a:1", Some(Duration::minutes(20)), Duration::minutes(30));
    let never_beat = processing(&store, "host-b:2", None, Duration::hours(2));
    let alive = processing(&store, "host-c:3", Some(Duration::seconds(20)), Duration::hours(1));
    let pending = pending_task("asset_processing", json!({}), 5, Utc::now() - Duration::days(1));
    let pending_id = pending.task_id;
    store.put(pending);

    let recovered = recover_orphans(&store, lease).await.unwrap();

    let mut ids: Vec<_> = recovered.iter().map(|t| t.task_id).collect();
    ids.sort();
    let mut expected = vec![stale, never_beat];
    expected.sort();
    assert_eq!(ids, expected);

    let stale = store.task(stale);
    assert_eq!(stale.status, TaskStatus::Failed);
    assert_eq!(
        stale.error_message.as_deref(),
        Some("lease expired: worker host-a:1 stopped heartbeating")
    );
    assert!(stale.completed_at.is_some());

    assert_eq!(store.task(alive).status, TaskStatus::Processing);
    assert_eq!(store.task(pending_id).status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_recovered_task_cannot_be_completed_by_old_worker() {
    let store = MemoryTaskStore::new();
    let id = processing(&store, "host-a:1", Some(Duration::hours(1)), Duration::hours(1));

    recover_orphans(&store, Duration::seconds(DEFAULT_LEASE_SECS))
        .await
        .unwrap();

    let recorded = store.complete(id, "host-a:1", json!({})).await.unwrap();
    assert!(!recorded);
    assert_eq!(store.task(id).status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_nothing_to_recover() {
    let store = MemoryTaskStore::new();
    processing(&store, "host-a:1", Some(Duration::seconds(5)), Duration::seconds(5));

    let recovered = recover_orphans(&store, Duration::seconds(DEFAULT_LEASE_SECS))
        .await
        .unwrap();

    assert!(recovered.is_empty());
}
