//! `solidus-batch process-assets` command implementation

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use colored::Colorize;
use sqlx::PgPool;
use uuid::Uuid;

use super::report_table;
use crate::assets::{
    AssetProcessingHandler, ImageMagickProcessor, PgAssetRepository, ASSET_PROCESSING_TASK,
};
use crate::config::Config;
use crate::tasks::{
    ClaimFilter, ConsumerConfig, HandlerRegistry, PgTaskStore, RunSummary, TaskConsumer, TaskStatus,
};

pub async fn run(pool: PgPool, config: &Config, batch_size: i64, task_id: Option<Uuid>) -> Result<()> {
    let processor = ImageMagickProcessor::new(
        config.assets.imagemagick_path.clone(),
        config.assets.media_root.clone(),
    );
    let handler = AssetProcessingHandler::new(
        Arc::new(PgAssetRepository::new(pool.clone())),
        Arc::new(processor),
    );
    let handlers = HandlerRegistry::new().register(Arc::new(handler));

    let consumer = TaskConsumer::new(
        Arc::new(PgTaskStore::new(pool)),
        handlers,
        ConsumerConfig {
            batch_size,
            heartbeat_interval: Duration::from_secs(config.tasks.heartbeat_interval_secs),
            filter: ClaimFilter::task_types([ASSET_PROCESSING_TASK]),
        },
    );

    let summary = match task_id {
        Some(task_id) => consumer.process_specific(task_id).await?,
        None => consumer.run_once().await?,
    };

    if summary.claimed == 0 {
        println!("No pending asset processing tasks");
        return Ok(());
    }

    print_summary(&summary);

    if summary.unrecorded > 0 {
        bail!(
            "{} task outcome(s) could not be recorded; recover-tasks will fail them once their lease expires",
            summary.unrecorded
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let mut table = report_table(["Task", "Status", "Error"]);
    for outcome in &summary.outcomes {
        let status = match (outcome.status, outcome.recorded) {
            _ if outcome.record_error.is_some() => "unrecorded".red().bold().to_string(),
            (_, false) => "lost".yellow().to_string(),
            (TaskStatus::Completed, true) => "completed".green().to_string(),
            (status, true) => status.as_str().red().to_string(),
        };
        table.add_row(vec![
            outcome.task_id.to_string(),
            status,
            outcome
                .error
                .clone()
                .or_else(|| outcome.record_error.clone())
                .unwrap_or_default(),
        ]);
    }

    println!("{}", table);
    println!(
        "Claimed {}, completed {}, failed {}",
        summary.claimed,
        summary.completed.to_string().green(),
        summary.failed.to_string().red()
    );
}
