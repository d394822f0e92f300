//! `solidus-batch import-categories` command implementation

use anyhow::{Context, Result};
use colored::Colorize;
use sqlx::PgPool;

use super::report_table;
use crate::categories::{CategoryImporter, DiffSummary, ImportReport, PgCategoryStore};
use crate::etl::{MySqlSource, SourceConfig};

pub async fn run(pool: PgPool, source: SourceConfig, apply: bool) -> Result<()> {
    let source = MySqlSource::connect(&source)
        .await
        .context("Source database unavailable")?;
    let store = PgCategoryStore::new(pool);

    let report = CategoryImporter::new(&source, &store, apply).run().await?;
    print_report(&report);

    Ok(())
}

fn diff_row(summary: &DiffSummary) -> Vec<String> {
    vec![
        summary.table.clone(),
        summary.fetched.to_string(),
        summary.new.len().to_string(),
        summary.changed.len().to_string(),
        summary.unchanged.to_string(),
    ]
}

fn print_report(report: &ImportReport) {
    let mut table = report_table(["Source", "Fetched", "New", "Updated", "Unchanged"]);
    table.add_row(diff_row(&report.categories));
    table.add_row(diff_row(&report.subcategories));

    println!("{}", "Category import".cyan().bold());
    println!("{}", table);

    for summary in [&report.categories, &report.subcategories] {
        for (id, old, new) in &summary.changed {
            println!(
                "  {} {} {}: '{}' -> '{}'",
                "~".yellow(),
                summary.table,
                id,
                old,
                new
            );
        }
    }

    let hierarchy = &report.hierarchy;
    println!(
        "Subcategories with assigned parent: {}",
        hierarchy.assigned.len()
    );
    println!("Already assigned: {}", hierarchy.already_assigned);
    println!("Missing category records: {}", hierarchy.missing);
    println!(
        "{}",
        format!(
            "Ambiguous subcategory relationships: {}",
            hierarchy.ambiguous.len()
        )
        .yellow()
    );
    for (sub_id, parents) in &hierarchy.ambiguous {
        println!("  - SubCategory {} has multiple parents: {:?}", sub_id, parents);
    }
    for (sub_id, parent_id) in &hierarchy.cycles {
        println!(
            "  {} SubCategory {} under {} would create a cycle",
            "!".red(),
            sub_id,
            parent_id
        );
    }

    if report.applied {
        println!("{}", "Category import applied.".green());
    } else {
        println!("Run again with --apply to perform the import.");
    }
}
