//! Persisted task queue and its consumer

pub mod consumer;
pub mod error;
pub mod recovery;
pub mod store;
pub mod types;

pub use consumer::{
    ConsumerConfig, HandlerRegistry, RunSummary, TaskConsumer, TaskHandler, TaskOutcome,
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_POLL_BATCH_SIZE,
};
pub use error::{TaskError, TaskResult};
pub use recovery::{recover_orphans, RecoveredTask, DEFAULT_LEASE_SECS};
pub use store::{ClaimFilter, PgTaskStore, TaskStore};
pub use types::{NewTask, Task, TaskStatus};
