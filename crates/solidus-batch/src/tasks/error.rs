use thiserror::Error;
use uuid::Uuid;

use super::types::TaskStatus;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(Uuid),

    /// The task exists but is not pending
    #[error("Task {task_id} is {status} and cannot be claimed")]
    NotClaimable { task_id: Uuid, status: TaskStatus },

    #[error("Task queue query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid task status in queue: {0}")]
    InvalidStatus(String),
}

pub type TaskResult<T> = Result<T, TaskError>;
