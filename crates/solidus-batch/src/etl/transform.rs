//! Source row to destination entity conversion

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::MigrationResult;
use super::schema::{EntityDef, FieldDef, FieldKind};
use super::value::{FieldValue, SourceRow};

/// Existence check for a related entity by its natural key
#[async_trait]
pub trait RelationLookup: Send + Sync {
    async fn exists(&self, entity: &'static EntityDef, key: i64) -> MigrationResult<bool>;
}

/// A fully resolved destination row, values in `entity.fields` order
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub def: &'static EntityDef,
    pub values: Vec<FieldValue>,
}

impl Entity {
    pub fn primary_key(&self) -> i64 {
        self.values[self.def.primary_key_index()]
            .as_i64()
            .unwrap_or_default()
    }

    pub fn value(&self, column: &str) -> Option<&FieldValue> {
        self.def
            .fields
            .iter()
            .position(|f| f.column == column)
            .map(|i| &self.values[i])
    }
}

/// Why a row was left out of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingPrimaryKey,
    Uncoercible { column: &'static str, value: String },
    MissingRequired { column: &'static str },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingPrimaryKey => f.write_str("primary key missing"),
            SkipReason::Uncoercible { column, value } => {
                write!(f, "value '{}' for {} cannot be coerced", value, column)
            }
            SkipReason::MissingRequired { column } => write!(f, "required {} is empty", column),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    Row {
        entity: Entity,
        /// Relation columns whose key was not found in the destination
        dangling: Vec<&'static str>,
    },
    Skip(SkipReason),
}

/// Turns source rows into destination entities, caching relation lookups
pub struct RowTransformer<'a> {
    lookup: &'a dyn RelationLookup,
    cache: HashMap<(&'static str, i64), bool>,
    lookups: u64,
}

impl<'a> RowTransformer<'a> {
    pub fn new(lookup: &'a dyn RelationLookup) -> Self {
        Self {
            lookup,
            cache: HashMap::new(),
            lookups: 0,
        }
    }

    /// Queries issued against the destination so far
    pub fn lookups(&self) -> u64 {
        self.lookups
    }

    /// Forget cached misses for one entity type once its rows have landed
    pub fn invalidate(&mut self, entity: &EntityDef) {
        self.cache.retain(|(name, _), found| *name != entity.name || *found);
    }

    pub async fn transform(
        &mut self,
        row: &SourceRow,
        def: &'static EntityDef,
    ) -> MigrationResult<Transformed> {
        let mut values = Vec::with_capacity(def.fields.len());
        let mut dangling = Vec::new();

        for field in def.fields {
            let raw = row
                .get(field.source_column)
                .cloned()
                .unwrap_or(FieldValue::Null)
                .trimmed();

            if field.column == def.primary_key {
                match raw.as_i64() {
                    Some(key) => values.push(FieldValue::Int(key)),
                    None => return Ok(Transformed::Skip(SkipReason::MissingPrimaryKey)),
                }
                continue;
            }

            match field.kind {
                FieldKind::Relation(target) => {
                    let value = self.resolve_relation(field, target, &raw).await?;
                    if value.is_null() && !is_blank(&raw) {
                        dangling.push(field.column);
                    }
                    values.push(value);
                }
                _ => match coerce(field, raw) {
                    Ok(value) => values.push(value),
                    Err(reason) => return Ok(Transformed::Skip(reason)),
                },
            }
        }

        Ok(Transformed::Row {
            entity: Entity { def, values },
            dangling,
        })
    }

    async fn resolve_relation(
        &mut self,
        field: &FieldDef,
        target: &'static str,
        raw: &FieldValue,
    ) -> MigrationResult<FieldValue> {
        let Some(key) = raw.as_i64() else {
            return Ok(FieldValue::Null);
        };
        let Some(target_def) = super::schema::resolve(target) else {
            tracing::warn!(column = field.column, target, "Relation target not registered");
            return Ok(FieldValue::Null);
        };

        let found = match self.cache.get(&(target, key)) {
            Some(found) => *found,
            None => {
                self.lookups += 1;
                let found = self.lookup.exists(target_def, key).await?;
                self.cache.insert((target, key), found);
                found
            }
        };

        Ok(if found {
            FieldValue::Int(key)
        } else {
            FieldValue::Null
        })
    }
}

fn is_blank(value: &FieldValue) -> bool {
    match value {
        FieldValue::Null => true,
        FieldValue::Text(s) => s.is_empty(),
        _ => false,
    }
}

fn coerce(field: &FieldDef, raw: FieldValue) -> Result<FieldValue, SkipReason> {
    if is_blank(&raw) {
        return match (field.kind, field.nullable) {
            (_, true) => Ok(FieldValue::Null),
            // Empty text is still text
            (FieldKind::Text, false) if !raw.is_null() => Ok(raw),
            _ => Err(SkipReason::MissingRequired {
                column: field.column,
            }),
        };
    }

    let coerced = match field.kind {
        FieldKind::Integer => raw.as_i64().map(FieldValue::Int),
        FieldKind::Date => raw.as_date().map(FieldValue::Date),
        FieldKind::Text => raw.as_text().map(FieldValue::Text),
        FieldKind::Relation(_) => Some(raw.clone()),
    };

    match coerced {
        Some(value) => Ok(value),
        None if field.nullable => {
            tracing::debug!(column = field.column, value = %raw, "Uncoercible value stored as NULL");
            Ok(FieldValue::Null)
        }
        None => Err(SkipReason::Uncoercible {
            column: field.column,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::schema::resolve;
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Known {
        keys: HashSet<(&'static str, i64)>,
        calls: AtomicU64,
    }

    impl Known {
        fn new(keys: &[(&'static str, i64)]) -> Self {
            Self {
                keys: keys.iter().copied().collect(),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl RelationLookup for Known {
        async fn exists(&self, entity: &'static EntityDef, key: i64) -> MigrationResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.keys.contains(&(entity.name, key)))
        }
    }

    fn expect_row(result: Transformed) -> (Entity, Vec<&'static str>) {
        match result {
            Transformed::Row { entity, dangling } => (entity, dangling),
            Transformed::Skip(reason) => panic!("unexpected skip: {}", reason),
        }
    }

    #[tokio::test]
    async fn test_text_is_trimmed() {
        let lookup = Known::new(&[]);
        let mut transformer = RowTransformer::new(&lookup);
        let row = SourceRow::new()
            .with("CategoryID", 1)
            .with("CategoryName", "  Brakes ");

        let (entity, dangling) =
            expect_row(transformer.transform(&row, resolve("Categories").unwrap()).await.unwrap());

        assert_eq!(entity.primary_key(), 1);
        assert_eq!(entity.value("category_name"), Some(&FieldValue::from("Brakes")));
        assert!(dangling.is_empty());
    }

    #[tokio::test]
    async fn test_relation_found_assigned_missing_nulled() {
        let lookup = Known::new(&[("Parts", 10), ("Categories", 1)]);
        let mut transformer = RowTransformer::new(&lookup);
        let row = SourceRow::new()
            .with("PartCategoryID", 5)
            .with("PartTerminologyID", 10)
            .with("SubCategoryID", 99)
            .with("CategoryID", 1);

        let (entity, dangling) = expect_row(
            transformer
                .transform(&row, resolve("PartCategory").unwrap())
                .await
                .unwrap(),
        );

        assert_eq!(entity.value("part_id"), Some(&FieldValue::Int(10)));
        assert_eq!(entity.value("category_id"), Some(&FieldValue::Int(1)));
        assert_eq!(entity.value("subcategory_id"), Some(&FieldValue::Null));
        assert_eq!(dangling, vec!["subcategory_id"]);
    }

    #[tokio::test]
    async fn test_absent_relation_is_null_not_dangling() {
        let lookup = Known::new(&[]);
        let mut transformer = RowTransformer::new(&lookup);
        let row = SourceRow::new()
            .with("PartTerminologyID", 7)
            .with("PartTerminologyName", "Oil Filter")
            .with("PartsDescriptionID", FieldValue::Null)
            .with("RevDate", "2023-05-01");

        let (entity, dangling) =
            expect_row(transformer.transform(&row, resolve("Parts").unwrap()).await.unwrap());

        assert_eq!(entity.value("parts_description_id"), Some(&FieldValue::Null));
        assert_eq!(
            entity.value("rev_date"),
            Some(&FieldValue::Date(NaiveDate::from_ymd_opt(2023, 5, 1).unwrap()))
        );
        assert!(dangling.is_empty());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_primary_key_skips_row() {
        let lookup = Known::new(&[]);
        let mut transformer = RowTransformer::new(&lookup);
        let row = SourceRow::new().with("CategoryName", "Orphan");

        let result = transformer
            .transform(&row, resolve("Categories").unwrap())
            .await
            .unwrap();
        assert_eq!(result, Transformed::Skip(SkipReason::MissingPrimaryKey));
    }

    #[tokio::test]
    async fn test_required_null_skips_row() {
        let lookup = Known::new(&[]);
        let mut transformer = RowTransformer::new(&lookup);
        let row = SourceRow::new()
            .with("CategoryID", 3)
            .with("CategoryName", FieldValue::Null);

        let result = transformer
            .transform(&row, resolve("Categories").unwrap())
            .await
            .unwrap();
        assert_eq!(
            result,
            Transformed::Skip(SkipReason::MissingRequired {
                column: "category_name"
            })
        );
    }

    #[tokio::test]
    async fn test_lookups_are_cached_per_key() {
        let lookup = Known::new(&[("Parts", 10)]);
        let mut transformer = RowTransformer::new(&lookup);
        let def = resolve("PartPosition").unwrap();

        for id in 1..=5 {
            let row = SourceRow::new()
                .with("PartPositionID", id)
                .with("PartTerminologyID", 10)
                .with("PositionID", 2);
            transformer.transform(&row, def).await.unwrap();
        }

        // One query for Parts/10, one for Positions/2
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
        assert_eq!(transformer.lookups(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_drops_cached_misses_only() {
        let lookup = Known::new(&[("Parts", 10)]);
        let mut transformer = RowTransformer::new(&lookup);
        let def = resolve("PartPosition").unwrap();
        let row = SourceRow::new()
            .with("PartPositionID", 1)
            .with("PartTerminologyID", 10)
            .with("PositionID", 2);

        transformer.transform(&row, def).await.unwrap();
        transformer.invalidate(resolve("Positions").unwrap());
        transformer.transform(&row, def).await.unwrap();

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
    }
}
