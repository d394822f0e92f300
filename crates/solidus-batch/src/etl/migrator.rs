//! Migration run orchestration
//!
//! A run enumerates the source tables, resolves each one against the entity
//! registry, orders the resolved types so relation targets land first, then
//! streams every table through the transformer into the batch loader.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;

use super::error::{MigrationError, MigrationResult};
use super::loader::{BatchFailurePolicy, BatchLoader, DestinationStore, DEFAULT_BATCH_SIZE};
use super::plan::plan;
use super::schema::{resolve, EntityDef};
use super::source::SourceReader;
use super::transform::{RelationLookup, RowTransformer, Transformed};
use crate::progress::create_progress_bar;

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub batch_size: usize,
    pub on_batch_error: BatchFailurePolicy,
    /// Restrict the run to these source tables
    pub tables: Option<Vec<String>>,
    pub show_progress: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            on_batch_error: BatchFailurePolicy::default(),
            tables: None,
            show_progress: false,
        }
    }
}

/// Outcome of migrating one table
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableReport {
    pub table: String,
    pub destination: String,
    pub read: u64,
    pub new: u64,
    pub unchanged: u64,
    pub conflicting: u64,
    /// Always zero: existing rows are never updated
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub dangling: u64,
    /// Set when the table was given up on under the skip-table policy
    pub abandoned: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub started_at: DateTime<Utc>,
    pub tables: Vec<TableReport>,
    /// Source tables with no registered entity type
    pub unresolved: Vec<String>,
    pub elapsed_ms: u64,
}

impl MigrationReport {
    pub fn total(&self, field: impl Fn(&TableReport) -> u64) -> u64 {
        self.tables.iter().map(field).sum()
    }

    /// Any rows failed or tables abandoned
    pub fn has_failures(&self) -> bool {
        self.tables
            .iter()
            .any(|t| t.failed > 0 || t.abandoned.is_some())
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }
}

pub struct Migrator<'a> {
    source: &'a dyn SourceReader,
    destination: &'a dyn DestinationStore,
    lookup: &'a dyn RelationLookup,
    options: MigrationOptions,
}

impl<'a> Migrator<'a> {
    pub fn new(
        source: &'a dyn SourceReader,
        destination: &'a dyn DestinationStore,
        lookup: &'a dyn RelationLookup,
        options: MigrationOptions,
    ) -> Self {
        Self {
            source,
            destination,
            lookup,
            options,
        }
    }

    pub async fn run(&self) -> MigrationResult<MigrationReport> {
        let started_at = Utc::now();
        let clock = Instant::now();

        let tables = self.select_tables().await?;

        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        for table in tables {
            match resolve(&table) {
                Some(def) => resolved.push(def),
                None => {
                    tracing::warn!(table = %table, "No entity type registered for source table, skipping");
                    unresolved.push(table);
                }
            }
        }

        let ordered = plan(&resolved)?;
        tracing::info!(
            tables = ordered.len(),
            order = %ordered.iter().map(|d| d.name).collect::<Vec<_>>().join(" -> "),
            batch_size = self.options.batch_size,
            on_batch_error = self.options.on_batch_error.as_str(),
            "Migration planned"
        );

        let mut transformer = RowTransformer::new(self.lookup);
        let mut reports = Vec::with_capacity(ordered.len());

        for def in ordered {
            let report = self.migrate_table(def, &mut transformer).await?;
            transformer.invalidate(def);
            reports.push(report);
        }

        let report = MigrationReport {
            started_at,
            tables: reports,
            unresolved,
            elapsed_ms: duration_ms(clock.elapsed()),
        };

        tracing::info!(
            tables = report.tables.len(),
            read = report.total(|t| t.read),
            new = report.total(|t| t.new),
            skipped = report.total(|t| t.skipped),
            failed = report.total(|t| t.failed),
            relation_queries = transformer.lookups(),
            elapsed_ms = report.elapsed_ms,
            "Migration finished"
        );

        Ok(report)
    }

    async fn select_tables(&self) -> MigrationResult<Vec<String>> {
        let available = self.source.tables().await?;
        let Some(requested) = &self.options.tables else {
            return Ok(available);
        };

        let known: BTreeSet<&str> = available.iter().map(String::as_str).collect();
        if let Some(missing) = requested.iter().find(|t| !known.contains(t.as_str())) {
            return Err(MigrationError::UnknownTable(missing.clone()));
        }

        Ok(available
            .iter()
            .filter(|t| requested.contains(t))
            .cloned()
            .collect())
    }

    async fn migrate_table(
        &self,
        def: &'static EntityDef,
        transformer: &mut RowTransformer<'_>,
    ) -> MigrationResult<TableReport> {
        let clock = Instant::now();
        let mut report = TableReport {
            table: def.name.to_string(),
            destination: def.table.to_string(),
            ..Default::default()
        };

        let rows = self.source.read_table(def.name).await?;
        report.read = rows.len() as u64;
        tracing::info!(table = def.name, rows = rows.len(), "Migrating table");

        let progress = if self.options.show_progress {
            create_progress_bar(report.read, def.name)
        } else {
            ProgressBar::hidden()
        };

        let mut loader = BatchLoader::new(
            self.destination,
            def,
            self.options.batch_size,
            self.options.on_batch_error,
        );

        let mut outcome = Ok(());
        for row in &rows {
            progress.inc(1);
            match transformer.transform(row, def).await? {
                Transformed::Row { entity, dangling } => {
                    if !dangling.is_empty() {
                        report.dangling += dangling.len() as u64;
                        tracing::debug!(
                            table = def.name,
                            key = entity.primary_key(),
                            columns = ?dangling,
                            "Relation target missing, stored as NULL"
                        );
                    }
                    if let Err(e) = loader.add(entity).await {
                        outcome = Err(e);
                        break;
                    }
                }
                Transformed::Skip(reason) => {
                    report.skipped += 1;
                    tracing::warn!(
                        table = def.name,
                        key = ?row.get(def.primary_key_field().source_column).map(ToString::to_string),
                        reason = %reason,
                        "Row skipped"
                    );
                }
            }
        }

        if outcome.is_ok() {
            outcome = loader.flush().await;
        }

        match outcome {
            Ok(()) => {}
            Err(e @ MigrationError::BatchInsert { .. })
                if self.options.on_batch_error == BatchFailurePolicy::SkipTable =>
            {
                tracing::error!(table = def.name, error = %e, "Batch failed, abandoning table");
                report.abandoned = Some(e.to_string());
            }
            Err(e) => {
                progress.abandon();
                return Err(e);
            }
        }

        let stats = loader.stats();
        report.new = stats.new;
        report.unchanged = stats.unchanged;
        report.conflicting = stats.conflicting;
        report.failed = stats.failed;
        report.elapsed_ms = duration_ms(clock.elapsed());
        progress.finish_and_clear();

        tracing::info!(
            table = def.name,
            read = report.read,
            new = report.new,
            unchanged = report.unchanged,
            conflicting = report.conflicting,
            skipped = report.skipped,
            failed = report.failed,
            dangling = report.dangling,
            "Table migrated"
        );

        Ok(report)
    }
}

fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
