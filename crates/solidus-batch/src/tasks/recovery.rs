//! Orphaned task recovery
//!
//! A consumer that dies mid-task leaves its task in `processing` forever. Any
//! such task whose heartbeat is older than the lease is failed so that the
//! queue never holds a task nobody owns.

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::error::TaskResult;
use super::store::TaskStore;

/// Default lease before a silent `processing` task counts as orphaned
pub const DEFAULT_LEASE_SECS: i64 = 600;

#[derive(Debug, Clone, Serialize)]
pub struct RecoveredTask {
    pub task_id: Uuid,
    pub task_type: String,
    pub worker_id: Option<String>,
}

pub async fn recover_orphans(store: &dyn TaskStore, lease: Duration) -> TaskResult<Vec<RecoveredTask>> {
    let recovered = store.recover_orphans(lease, Utc::now()).await?;

    for task in &recovered {
        tracing::warn!(
            task_id = %task.task_id,
            task_type = %task.task_type,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown"),
            "Recovered orphaned task"
        );
    }
    tracing::info!(
        recovered = recovered.len(),
        lease_secs = lease.num_seconds(),
        "Orphan recovery finished"
    );

    Ok(recovered
        .into_iter()
        .map(|t| RecoveredTask {
            task_id: t.task_id,
            task_type: t.task_type,
            worker_id: t.worker_id,
        })
        .collect())
}
