//! solidus-batch - Main entry point

use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use solidus_batch::commands;
use solidus_batch::config::{Config, TaskConfig};
use solidus_batch::db::{create_pool, health_check, run_migrations};
use solidus_batch::etl::MigrationOptions;
use solidus_batch::{Cli, Commands};
use solidus_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("solidus-batch".to_string())
        .filter_directives("sqlx=warn".to_string())
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring invalid LOG_* settings: {}", e);
        log_config
    });

    // Keep the guard alive so buffered file logs are flushed on exit
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let pool = create_pool(&config.database).await?;
    health_check(&pool)
        .await
        .context("Destination database unavailable")?;

    if cli.apply_migrations {
        run_migrations(&pool).await?;
    }

    match &cli.command {
        Commands::Migrate {
            source,
            batch_size,
            on_batch_error,
            tables,
            json,
        } => {
            let options = MigrationOptions {
                batch_size: *batch_size,
                on_batch_error: *on_batch_error,
                tables: tables.clone(),
                show_progress: !*json,
            };
            commands::migrate::run(pool, source.to_config(), options, *json).await
        }

        Commands::ImportCategories { source, apply } => {
            commands::import_categories::run(pool, source.to_config(), *apply).await
        }

        Commands::ProcessAssets {
            batch_size,
            task_id,
        } => commands::process_assets::run(pool, &config, *batch_size, *task_id).await,

        Commands::RecoverTasks { lease_secs } => {
            let tasks = TaskConfig {
                lease_secs: lease_secs.unwrap_or(config.tasks.lease_secs),
                ..config.tasks.clone()
            };
            let lease = tasks.lease().context("Invalid --lease-secs")?;
            commands::recover_tasks::run(pool, lease).await
        }
    }
}
