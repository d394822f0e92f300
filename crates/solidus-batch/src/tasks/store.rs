//! Persistence for the task queue
//!
//! Claims are a single `UPDATE ... WHERE task_id IN (SELECT ... FOR UPDATE
//! SKIP LOCKED) RETURNING *`, so two consumers polling at the same moment
//! never receive the same task. Terminal transitions only apply to a task
//! still `processing` under the caller's worker id.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::error::{TaskError, TaskResult};
use super::types::{NewTask, Task, DEFAULT_MAX_ATTEMPTS};

/// Filter applied when polling for due tasks
#[derive(Debug, Clone, Default)]
pub struct ClaimFilter {
    /// Only claim these task types; `None` claims any type
    pub task_types: Option<Vec<String>>,
}

impl ClaimFilter {
    pub fn task_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task_types: Some(types.into_iter().map(Into::into).collect()),
        }
    }

    pub fn matches(&self, task_type: &str) -> bool {
        self.task_types
            .as_ref()
            .map_or(true, |types| types.iter().any(|t| t == task_type))
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn enqueue(&self, task: NewTask) -> TaskResult<Task>;

    async fn get(&self, task_id: Uuid) -> TaskResult<Option<Task>>;

    /// Claim up to `limit` due pending tasks, best priority first
    async fn claim_due(
        &self,
        filter: &ClaimFilter,
        worker_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> TaskResult<Vec<Task>>;

    /// Claim one task by id if it is pending, regardless of schedule
    ///
    /// A task whose type the filter excludes is reported as not found.
    async fn claim_specific(
        &self,
        task_id: Uuid,
        filter: &ClaimFilter,
        worker_id: &str,
    ) -> TaskResult<Task>;

    /// `processing -> completed`; false when the task is no longer ours
    async fn complete(
        &self,
        task_id: Uuid,
        worker_id: &str,
        result: serde_json::Value,
    ) -> TaskResult<bool>;

    /// `processing -> failed`; false when the task is no longer ours
    async fn fail(&self, task_id: Uuid, worker_id: &str, error: &str) -> TaskResult<bool>;

    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> TaskResult<()>;

    /// Fail `processing` tasks whose last heartbeat is older than `lease`
    async fn recover_orphans(&self, lease: Duration, now: DateTime<Utc>) -> TaskResult<Vec<Task>>;
}

#[derive(Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn enqueue(&self, task: NewTask) -> TaskResult<Task> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO task_queue (task_id, task_type, task_data, priority, status, max_attempts, scheduled_for)
            VALUES ($1, $2, $3, $4, 'pending', $5, COALESCE($6, NOW()))
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&task.task_type)
        .bind(&task.task_data)
        .bind(task.priority)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .bind(task.scheduled_for)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(task_id = %task.task_id, task_type = %task.task_type, "Task enqueued");
        Ok(task)
    }

    async fn get(&self, task_id: Uuid) -> TaskResult<Option<Task>> {
        Ok(
            sqlx::query_as::<_, Task>("SELECT * FROM task_queue WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn claim_due(
        &self,
        filter: &ClaimFilter,
        worker_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> TaskResult<Vec<Task>> {
        let mut tasks = sqlx::query_as::<_, Task>(
            r#"
            UPDATE task_queue
            SET status = 'processing',
                worker_id = $1,
                started_at = $2,
                heartbeat_at = $2,
                attempts = attempts + 1
            WHERE task_id IN (
                SELECT task_id
                FROM task_queue
                WHERE status = 'pending'
                  AND scheduled_for <= $2
                  AND ($3::text[] IS NULL OR task_type = ANY($3))
                ORDER BY priority ASC, created_at ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(filter.task_types.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING order is unspecified
        tasks.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
        });

        Ok(tasks)
    }

    async fn claim_specific(
        &self,
        task_id: Uuid,
        filter: &ClaimFilter,
        worker_id: &str,
    ) -> TaskResult<Task> {
        let claimed = sqlx::query_as::<_, Task>(
            r#"
            UPDATE task_queue
            SET status = 'processing',
                worker_id = $2,
                started_at = NOW(),
                heartbeat_at = NOW(),
                attempts = attempts + 1
            WHERE task_id = $1
              AND status = 'pending'
              AND ($3::text[] IS NULL OR task_type = ANY($3))
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(filter.task_types.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(task) = claimed {
            return Ok(task);
        }

        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM task_queue WHERE task_id = $1 AND ($2::text[] IS NULL OR task_type = ANY($2))",
        )
        .bind(task_id)
        .bind(filter.task_types.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        match status {
            None => Err(TaskError::NotFound(task_id)),
            Some(status) => Err(TaskError::NotClaimable {
                task_id,
                status: status.parse().map_err(TaskError::InvalidStatus)?,
            }),
        }
    }

    async fn complete(
        &self,
        task_id: Uuid,
        worker_id: &str,
        result: serde_json::Value,
    ) -> TaskResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE task_queue
            SET status = 'completed', completed_at = NOW(), result = $3, error_message = NULL
            WHERE task_id = $1 AND status = 'processing' AND worker_id = $2
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn fail(&self, task_id: Uuid, worker_id: &str, error: &str) -> TaskResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE task_queue
            SET status = 'failed', completed_at = NOW(), error_message = $3
            WHERE task_id = $1 AND status = 'processing' AND worker_id = $2
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn heartbeat(&self, task_id: Uuid, worker_id: &str) -> TaskResult<()> {
        sqlx::query(
            r#"
            UPDATE task_queue
            SET heartbeat_at = NOW()
            WHERE task_id = $1 AND status = 'processing' AND worker_id = $2
            "#,
        )
        .bind(task_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recover_orphans(&self, lease: Duration, now: DateTime<Utc>) -> TaskResult<Vec<Task>> {
        let cutoff = now - lease;
        let recovered = sqlx::query_as::<_, Task>(
            r#"
            UPDATE task_queue
            SET status = 'failed',
                completed_at = $2,
                error_message = 'lease expired: worker ' || COALESCE(worker_id, 'unknown')
                    || ' stopped heartbeating'
            WHERE status = 'processing'
              AND COALESCE(heartbeat_at, started_at, created_at) < $1
            RETURNING *
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(recovered)
    }
}
