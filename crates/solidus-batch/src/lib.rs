//! Solidus batch jobs
//!
//! Batch side of the Solidus automotive parts catalog:
//!
//! - **PCAdb migration**: AutoCare MySQL tables into PostgreSQL (`solidus-batch migrate`)
//! - **Category import**: AutoCare categories into the product taxonomy (`solidus-batch import-categories`)
//! - **Asset processing**: task queue consumer for image variants (`solidus-batch process-assets`)
//! - **Task recovery**: fail tasks whose consumer stopped heartbeating (`solidus-batch recover-tasks`)

#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod assets;
pub mod categories;
pub mod commands;
pub mod config;
pub mod db;
pub mod etl;
pub mod progress;
pub mod tasks;

use clap::{Args, Parser, Subcommand};

use crate::etl::source::{SourceConfig, DEFAULT_SOURCE_PORT};
use crate::etl::{BatchFailurePolicy, DEFAULT_BATCH_SIZE};
use crate::tasks::DEFAULT_POLL_BATCH_SIZE;

/// Solidus catalog batch jobs
#[derive(Parser, Debug)]
#[command(name = "solidus-batch")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Apply bundled schema migrations to the destination before running
    #[arg(long, global = true, env = "SOLIDUS_APPLY_MIGRATIONS")]
    pub apply_migrations: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy PCAdb tables from the AutoCare MySQL database into PostgreSQL
    Migrate {
        #[command(flatten)]
        source: SourceArgs,

        /// Rows per insert statement
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// What to do when a batch insert fails: abort, skip-table or isolate
        #[arg(long, default_value = "abort", value_parser = parse_policy)]
        on_batch_error: BatchFailurePolicy,

        /// Only migrate these source tables (comma separated)
        #[arg(long, value_delimiter = ',')]
        tables: Option<Vec<String>>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Import AutoCare categories and subcategories into the product taxonomy
    ImportCategories {
        #[command(flatten)]
        source: SourceArgs,

        /// Write changes; without it only the diff is reported
        #[arg(long)]
        apply: bool,
    },

    /// Run pending asset processing tasks
    ProcessAssets {
        /// Number of tasks to claim
        #[arg(
            long,
            default_value_t = DEFAULT_POLL_BATCH_SIZE,
            value_parser = clap::value_parser!(i64).range(1..)
        )]
        batch_size: i64,

        /// Process one specific task
        #[arg(long)]
        task_id: Option<uuid::Uuid>,
    },

    /// Fail tasks stuck in processing whose lease has expired
    RecoverTasks {
        /// Seconds without a heartbeat before a task counts as orphaned
        #[arg(long)]
        lease_secs: Option<i64>,
    },
}

/// Connection flags for the AutoCare source database
#[derive(Args, Clone)]
pub struct SourceArgs {
    /// Source MySQL host
    #[arg(long, env = "AUTOCARE_DB_HOST", default_value = "localhost")]
    pub source_host: String,

    /// Source MySQL port
    #[arg(long, env = "AUTOCARE_DB_PORT", default_value_t = DEFAULT_SOURCE_PORT)]
    pub source_port: u16,

    /// Source database name
    #[arg(long, env = "AUTOCARE_DB_NAME_PCADB", default_value = config::DEFAULT_SOURCE_DATABASE)]
    pub source_db: String,

    /// Source user
    #[arg(long, env = "AUTOCARE_DB_USER")]
    pub source_user: String,

    /// Source password
    #[arg(long, env = "AUTOCARE_DB_PASSWORD", hide_env_values = true)]
    pub source_password: String,

    /// Disable foreign key checks on source sessions
    #[arg(
        long,
        env = "AUTOCARE_DB_DISABLE_FK_CHECKS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub disable_fk_checks: bool,
}

impl std::fmt::Debug for SourceArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceArgs")
            .field("source_host", &self.source_host)
            .field("source_port", &self.source_port)
            .field("source_db", &self.source_db)
            .field("source_user", &self.source_user)
            .field("source_password", &"***")
            .field("disable_fk_checks", &self.disable_fk_checks)
            .finish()
    }
}

impl SourceArgs {
    pub fn to_config(&self) -> SourceConfig {
        SourceConfig {
            host: self.source_host.clone(),
            port: self.source_port,
            database: self.source_db.clone(),
            user: self.source_user.clone(),
            password: self.source_password.clone(),
            disable_foreign_key_checks: self.disable_fk_checks,
            connect_timeout_secs: config::DEFAULT_SOURCE_CONNECT_TIMEOUT_SECS,
        }
    }
}

fn parse_policy(value: &str) -> Result<BatchFailurePolicy, String> {
    value.parse()
}
