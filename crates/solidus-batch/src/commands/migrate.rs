//! `solidus-batch migrate` command implementation

use anyhow::{bail, Context, Result};
use colored::Colorize;
use sqlx::PgPool;

use super::report_table;
use crate::etl::{MigrationOptions, MigrationReport, Migrator, MySqlSource, PgDestination, SourceConfig};
use crate::progress::create_spinner;

pub async fn run(pool: PgPool, source: SourceConfig, options: MigrationOptions, json: bool) -> Result<()> {
    let show_progress = options.show_progress;
    let spinner = show_progress.then(|| create_spinner("Connecting to source database..."));
    let source = MySqlSource::connect(&source).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let source = source.context("Source database unavailable")?;

    let destination = PgDestination::new(pool);
    let migrator = Migrator::new(&source, &destination, &destination, options);
    let report = migrator.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.has_failures() {
        bail!(
            "{} row(s) failed, {} table(s) abandoned",
            report.total(|t| t.failed),
            report.tables.iter().filter(|t| t.abandoned.is_some()).count()
        );
    }

    Ok(())
}

fn print_report(report: &MigrationReport) {
    let mut table = report_table([
        "Table", "Read", "New", "Unchanged", "Conflicting", "Updated", "Skipped", "Failed", "Dangling",
    ]);

    for t in &report.tables {
        let name = if t.abandoned.is_some() {
            format!("{} (abandoned)", t.table)
        } else {
            t.table.clone()
        };
        table.add_row(vec![
            name,
            t.read.to_string(),
            t.new.to_string(),
            t.unchanged.to_string(),
            t.conflicting.to_string(),
            t.updated.to_string(),
            t.skipped.to_string(),
            t.failed.to_string(),
            t.dangling.to_string(),
        ]);
    }

    table.add_row(vec![
        "Total".to_string(),
        report.total(|t| t.read).to_string(),
        report.total(|t| t.new).to_string(),
        report.total(|t| t.unchanged).to_string(),
        report.total(|t| t.conflicting).to_string(),
        report.total(|t| t.updated).to_string(),
        report.total(|t| t.skipped).to_string(),
        report.total(|t| t.failed).to_string(),
        report.total(|t| t.dangling).to_string(),
    ]);

    println!("{}", "PCAdb migration".cyan().bold());
    println!("{}", table);

    if !report.unresolved.is_empty() {
        println!(
            "{} {}",
            "Skipped unregistered tables:".yellow(),
            report.unresolved.join(", ")
        );
    }

    let summary = format!(
        "{} tables in {:.1}s",
        report.tables.len(),
        report.elapsed_ms as f64 / 1000.0
    );
    if report.has_failures() {
        println!("{}", summary.red());
    } else {
        println!("{}", summary.green());
    }
}
