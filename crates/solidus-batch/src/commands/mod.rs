//! Command implementations
//!
//! Each subcommand has its own module with a `run` function. Reports go to
//! stdout; diagnostics go through `tracing`.

pub mod import_categories;
pub mod migrate;
pub mod process_assets;
pub mod recover_tasks;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};

/// Table preset shared by the command reports
pub(crate) fn report_table<I, S>(header: I) -> Table
where
    I: IntoIterator<Item = S>,
    S: Into<comfy_table::Cell>,
{
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}
