//! `solidus-batch recover-tasks` command implementation

use anyhow::Result;
use chrono::Duration;
use colored::Colorize;
use sqlx::PgPool;

use super::report_table;
use crate::tasks::{recover_orphans, PgTaskStore};

pub async fn run(pool: PgPool, lease: Duration) -> Result<()> {
    let store = PgTaskStore::new(pool);
    let recovered = recover_orphans(&store, lease).await?;

    if recovered.is_empty() {
        println!("No orphaned tasks");
        return Ok(());
    }

    let mut table = report_table(["Task", "Type", "Worker"]);
    for task in &recovered {
        table.add_row(vec![
            task.task_id.to_string(),
            task.task_type.clone(),
            task.worker_id.clone().unwrap_or_else(|| "unknown".to_string()),
        ]);
    }

    println!("{}", table);
    println!(
        "{}",
        format!("Failed {} orphaned task(s)", recovered.len()).yellow()
    );
    Ok(())
}
