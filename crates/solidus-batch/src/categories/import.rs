//! Category import from PCAdb `Categories`, `Subcategories` and `CodeMaster`
//!
//! Each name table is diffed against the categories imported from that same
//! table, keyed by PCAdb id; the two id sequences overlap and never match each
//! other. Nothing is written unless `apply` is set. Parents come from the
//! distinct `(CategoryID, SubCategoryID)` pairs in `CodeMaster`: a subcategory
//! with a single parent gets it, one with several is reported as ambiguous.
//! Reports carry PCAdb ids throughout.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use solidus_common::text::slugify;

use super::{Category, CategoryResult, CategorySource, CategoryStore, NewCategory};
use crate::etl::{SourceReader, SourceRow};

/// Source table and its id/name columns
struct NameTable {
    source: CategorySource,
    table: &'static str,
    id_column: &'static str,
    name_column: &'static str,
}

const CATEGORIES: NameTable = NameTable {
    source: CategorySource::Category,
    table: "Categories",
    id_column: "CategoryID",
    name_column: "CategoryName",
};

const SUBCATEGORIES: NameTable = NameTable {
    source: CategorySource::Subcategory,
    table: "Subcategories",
    id_column: "SubCategoryID",
    name_column: "SubCategoryName",
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffSummary {
    pub table: String,
    pub fetched: usize,
    pub new: Vec<(i64, String)>,
    /// `(id, current name, incoming name)`
    pub changed: Vec<(i64, String, String)>,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HierarchySummary {
    /// `(SubCategoryID, CategoryID)` pairs assigned (or to be assigned)
    pub assigned: Vec<(i64, i64)>,
    pub already_assigned: usize,
    /// Subcategories with more than one parent in `CodeMaster`
    pub ambiguous: Vec<(i64, Vec<i64>)>,
    /// Pairs where either side has not been imported yet
    pub missing: usize,
    /// Pairs rejected because the parent descends from the subcategory
    pub cycles: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub applied: bool,
    pub categories: DiffSummary,
    pub subcategories: DiffSummary,
    pub hierarchy: HierarchySummary,
}

pub struct CategoryImporter<'a> {
    source: &'a dyn SourceReader,
    store: &'a dyn CategoryStore,
    apply: bool,
}

/// Slug from the name, `category-<id>` when the name has no usable characters
pub fn category_slug(name: &str, id: i64) -> String {
    let slug = slugify(name);
    if slug.is_empty() {
        format!("category-{}", id)
    } else {
        slug
    }
}

/// First of `base`, `base-<id>`, `base-<id>-2`, ... not yet in `taken`
fn unique_slug(base: String, id: i64, taken: &mut HashSet<String>) -> String {
    let mut slug = base.clone();
    let mut attempt = 1;
    while taken.contains(&slug) {
        slug = if attempt == 1 {
            format!("{}-{}", base, id)
        } else {
            format!("{}-{}-{}", base, id, attempt)
        };
        attempt += 1;
    }
    taken.insert(slug.clone());
    slug
}

impl<'a> CategoryImporter<'a> {
    pub fn new(source: &'a dyn SourceReader, store: &'a dyn CategoryStore, apply: bool) -> Self {
        Self {
            source,
            store,
            apply,
        }
    }

    pub async fn run(&self) -> CategoryResult<ImportReport> {
        let categories = self.import_names(&CATEGORIES).await?;
        let subcategories = self.import_names(&SUBCATEGORIES).await?;
        let hierarchy = self.assign_parents().await?;

        Ok(ImportReport {
            applied: self.apply,
            categories,
            subcategories,
            hierarchy,
        })
    }

    async fn import_names(&self, names: &NameTable) -> CategoryResult<DiffSummary> {
        let rows = self.source.read_table(names.table).await?;
        let current = self.store.all().await?;

        let mut slugs: HashSet<String> = current.iter().map(|c| c.slug.clone()).collect();
        let existing: HashMap<i64, Category> = current
            .into_iter()
            .filter_map(|c| match c.source_key() {
                Some((source, pcadb_id)) if source == names.source => Some((pcadb_id, c)),
                _ => None,
            })
            .collect();

        let mut summary = DiffSummary {
            table: names.table.to_string(),
            fetched: rows.len(),
            ..Default::default()
        };

        for row in &rows {
            let Some((id, name)) = id_and_name(row, names) else {
                tracing::warn!(table = names.table, "Row without id or name skipped");
                continue;
            };

            match existing.get(&id) {
                None => summary.new.push((id, name)),
                Some(current) if current.name.trim() == name => summary.unchanged += 1,
                Some(current) => summary.changed.push((id, current.name.clone(), name)),
            }
        }

        tracing::info!(
            table = names.table,
            fetched = summary.fetched,
            new = summary.new.len(),
            changed = summary.changed.len(),
            unchanged = summary.unchanged,
            "Category diff"
        );

        if self.apply {
            for (i, (id, name)) in summary.new.iter().enumerate() {
                let slug = unique_slug(category_slug(name, *id), *id, &mut slugs);
                let category = NewCategory {
                    source: names.source,
                    pcadb_id: *id,
                    name: name.clone(),
                    image: format!("categories/{}.png", slug),
                    slug,
                    sort_order: i32::try_from(i + 1).unwrap_or(i32::MAX),
                    meta_title: name.clone(),
                };
                self.store.insert(&category).await?;
            }

            for (id, _, name) in &summary.changed {
                if let Some(current) = existing.get(id) {
                    self.store.rename(current.id, name).await?;
                }
            }
        }

        Ok(summary)
    }

    async fn assign_parents(&self) -> CategoryResult<HierarchySummary> {
        let rows = self.source.read_table("CodeMaster").await?;

        let mut parents_of: BTreeMap<i64, BTreeSet<i64>> = BTreeMap::new();
        for row in &rows {
            let category = row.get("CategoryID").and_then(|v| v.as_i64());
            let subcategory = row.get("SubCategoryID").and_then(|v| v.as_i64());
            if let (Some(category), Some(subcategory)) = (category, subcategory) {
                parents_of.entry(subcategory).or_default().insert(category);
            }
        }

        let current = self.store.all().await?;
        let by_key: HashMap<(CategorySource, i64), i64> = current
            .iter()
            .filter_map(|c| c.source_key().map(|key| (key, c.id)))
            .collect();
        let mut parent_map: HashMap<i64, Option<i64>> =
            current.iter().map(|c| (c.id, c.parent_id)).collect();

        let mut summary = HierarchySummary::default();

        for (sub_pcadb_id, parents) in parents_of {
            if parents.len() > 1 {
                summary.ambiguous.push((sub_pcadb_id, parents.into_iter().collect()));
                continue;
            }
            let Some(&parent_pcadb_id) = parents.iter().next() else {
                continue;
            };

            let sub = by_key.get(&(CategorySource::Subcategory, sub_pcadb_id));
            let parent = by_key.get(&(CategorySource::Category, parent_pcadb_id));
            let (Some(&sub_id), Some(&parent_id)) = (sub, parent) else {
                summary.missing += 1;
                continue;
            };

            if parent_map.get(&sub_id).copied().flatten() == Some(parent_id) {
                summary.already_assigned += 1;
                continue;
            }

            if creates_cycle(&parent_map, sub_id, parent_id) {
                tracing::warn!(
                    subcategory = sub_pcadb_id,
                    parent = parent_pcadb_id,
                    "Parent would create a cycle, skipped"
                );
                summary.cycles.push((sub_pcadb_id, parent_pcadb_id));
                continue;
            }

            if self.apply {
                self.store.set_parent(sub_id, parent_id).await?;
            }
            parent_map.insert(sub_id, Some(parent_id));
            summary.assigned.push((sub_pcadb_id, parent_pcadb_id));
        }

        for (sub_id, parents) in &summary.ambiguous {
            tracing::warn!(subcategory = sub_id, parents = ?parents, "Subcategory has multiple parents");
        }
        tracing::info!(
            assigned = summary.assigned.len(),
            ambiguous = summary.ambiguous.len(),
            missing = summary.missing,
            cycles = summary.cycles.len(),
            "Category hierarchy"
        );

        Ok(summary)
    }
}

fn id_and_name(row: &SourceRow, names: &NameTable) -> Option<(i64, String)> {
    let id = row.get(names.id_column)?.as_i64()?;
    let name = row.get(names.name_column)?.as_text()?.trim().to_string();
    Some((id, name))
}

/// Would making `parent_id` the parent of `child_id` close a loop?
fn creates_cycle(parents: &HashMap<i64, Option<i64>>, child_id: i64, parent_id: i64) -> bool {
    let mut seen = HashSet::new();
    let mut cursor = Some(parent_id);
    while let Some(id) = cursor {
        if id == child_id {
            return true;
        }
        if !seen.insert(id) {
            // Existing data already loops; refuse to extend it
            return true;
        }
        cursor = parents.get(&id).copied().flatten();
    }
    false
}
