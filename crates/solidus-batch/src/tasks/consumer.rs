//! Task queue consumer
//!
//! Polls due tasks, claims them atomically, runs the handler registered for
//! each task type and records the outcome. A failing or panicking handler only
//! fails its own task, and a store error while recording one outcome is logged
//! and counted; the rest of the batch still runs.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

use super::error::TaskResult;
use super::store::{ClaimFilter, TaskStore};
use super::types::{Task, TaskStatus};

/// Default number of tasks claimed per poll
pub const DEFAULT_POLL_BATCH_SIZE: i64 = 10;

/// Default heartbeat interval while a handler runs
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Executes one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_type(&self) -> &'static str;

    /// Run the task; the returned value is stored as the task result
    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value>;
}

/// Task type to handler mapping
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.task_type(), handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().map(|t| t.to_string()).collect();
        types.sort();
        types
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub batch_size: i64,
    pub heartbeat_interval: Duration,
    pub filter: ClaimFilter,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_POLL_BATCH_SIZE,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            filter: ClaimFilter::default(),
        }
    }
}

/// Final state of one claimed task
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub task_type: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    /// False when the outcome did not reach the queue
    pub recorded: bool,
    /// Store error that kept the outcome from being written
    pub record_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Outcomes that could not be recorded because the lease was lost
    pub lost: usize,
    /// Outcomes the store failed to write; the task stays `processing`
    pub unrecorded: usize,
    pub outcomes: Vec<TaskOutcome>,
}

impl RunSummary {
    fn record(&mut self, outcome: TaskOutcome) {
        if outcome.record_error.is_some() {
            self.unrecorded += 1;
        } else if !outcome.recorded {
            self.lost += 1;
        } else if outcome.status == TaskStatus::Completed {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }
}

pub struct TaskConsumer {
    store: Arc<dyn TaskStore>,
    handlers: HandlerRegistry,
    worker_id: String,
    config: ConsumerConfig,
}

impl TaskConsumer {
    pub fn new(store: Arc<dyn TaskStore>, handlers: HandlerRegistry, config: ConsumerConfig) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            store,
            handlers,
            worker_id: format!("{}:{}", hostname, Uuid::new_v4()),
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim one batch of due tasks and run them in claim order
    pub async fn run_once(&self) -> TaskResult<RunSummary> {
        let tasks = self
            .store
            .claim_due(
                &self.config.filter,
                &self.worker_id,
                self.config.batch_size,
                Utc::now(),
            )
            .await?;

        let mut summary = RunSummary {
            claimed: tasks.len(),
            ..Default::default()
        };

        if tasks.is_empty() {
            tracing::info!(worker_id = %self.worker_id, "No due tasks");
            return Ok(summary);
        }

        tracing::info!(worker_id = %self.worker_id, claimed = tasks.len(), "Claimed tasks");

        for task in tasks {
            summary.record(self.execute(task).await);
        }

        Ok(summary)
    }

    /// Claim and run one task by id, within the consumer's type filter
    pub async fn process_specific(&self, task_id: Uuid) -> TaskResult<RunSummary> {
        let task = self
            .store
            .claim_specific(task_id, &self.config.filter, &self.worker_id)
            .await?;
        let mut summary = RunSummary {
            claimed: 1,
            ..Default::default()
        };
        summary.record(self.execute(task).await);
        Ok(summary)
    }

    async fn execute(&self, task: Task) -> TaskOutcome {
        let task_id = task.task_id;
        tracing::info!(
            task_id = %task_id,
            task_type = %task.task_type,
            priority = task.priority,
            attempt = task.attempts,
            "Processing task"
        );

        let result = match self.handlers.get(&task.task_type) {
            None => Err(format!("no handler registered for task type '{}'", task.task_type)),
            Some(handler) => {
                let heartbeat = self.start_heartbeat_task(task_id);
                let run = AssertUnwindSafe(handler.handle(&task)).catch_unwind().await;
                heartbeat.abort();

                match run {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(format!("{:#}", e)),
                    Err(panic) => Err(format!("handler panicked: {}", panic_message(&*panic))),
                }
            }
        };

        let (status, error, written) = match result {
            Ok(value) => {
                let written = self.store.complete(task_id, &self.worker_id, value).await;
                if written.is_ok() {
                    tracing::info!(task_id = %task_id, "Task completed");
                }
                (TaskStatus::Completed, None, written)
            }
            Err(message) => {
                let written = self.store.fail(task_id, &self.worker_id, &message).await;
                tracing::error!(task_id = %task_id, error = %message, "Task failed");
                (TaskStatus::Failed, Some(message), written)
            }
        };

        let (recorded, record_error) = match written {
            Ok(true) => (true, None),
            Ok(false) => {
                tracing::warn!(
                    task_id = %task_id,
                    worker_id = %self.worker_id,
                    "Task was no longer held by this worker, outcome not recorded"
                );
                (false, None)
            }
            Err(e) => {
                tracing::error!(
                    task_id = %task_id,
                    status = %status,
                    error = %e,
                    "Failed to record task outcome"
                );
                (false, Some(e.to_string()))
            }
        };

        TaskOutcome {
            task_id,
            task_type: task.task_type,
            status,
            error,
            recorded,
            record_error,
        }
    }

    /// Refresh the task's lease until aborted
    fn start_heartbeat_task(&self, task_id: Uuid) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let worker_id = self.worker_id.clone();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; the claim already stamped heartbeat_at
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = store.heartbeat(task_id, &worker_id).await {
                    tracing::warn!(task_id = %task_id, error = %e, "Heartbeat failed");
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
