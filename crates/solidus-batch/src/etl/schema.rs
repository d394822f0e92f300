//! Destination entity registry for the PCAdb migration
//!
//! Every source table the migrator understands is listed here with its
//! destination table and column mapping. Lookup is by exact source table name;
//! anything not listed is skipped by the migrator.

/// Kind of a destination field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
    Date,
    /// Reference to another registered entity, by entity name
    Relation(&'static str),
}

/// One destination column and the source column it is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Destination column name
    pub column: &'static str,
    /// Source column name (PCAdb uses PascalCase)
    pub source_column: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDef {
    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation(_))
    }

    pub fn relation_target(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::Relation(target) => Some(target),
            _ => None,
        }
    }
}

/// A destination entity type
#[derive(Debug, PartialEq, Eq)]
pub struct EntityDef {
    /// Entity name, identical to the source table name
    pub name: &'static str,
    /// Destination table
    pub table: &'static str,
    /// Destination column holding the primary key
    pub primary_key: &'static str,
    /// Destination column holding the business key other entities refer to
    pub natural_key: &'static str,
    pub fields: &'static [FieldDef],
}

impl EntityDef {
    pub fn field(&self, column: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.column == column)
    }

    pub fn primary_key_index(&self) -> usize {
        self.fields
            .iter()
            .position(|f| f.column == self.primary_key)
            .unwrap_or(0)
    }

    pub fn primary_key_field(&self) -> &FieldDef {
        &self.fields[self.primary_key_index()]
    }

    /// Entity names this type refers to, excluding itself
    pub fn dependencies(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter_map(FieldDef::relation_target)
            .filter(move |target| *target != self.name)
    }
}

const fn pk(column: &'static str, source_column: &'static str) -> FieldDef {
    FieldDef {
        column,
        source_column,
        kind: FieldKind::Integer,
        nullable: false,
    }
}

const fn int(column: &'static str, source_column: &'static str) -> FieldDef {
    FieldDef {
        column,
        source_column,
        kind: FieldKind::Integer,
        nullable: true,
    }
}

const fn text(column: &'static str, source_column: &'static str, nullable: bool) -> FieldDef {
    FieldDef {
        column,
        source_column,
        kind: FieldKind::Text,
        nullable,
    }
}

const fn date(column: &'static str, source_column: &'static str) -> FieldDef {
    FieldDef {
        column,
        source_column,
        kind: FieldKind::Date,
        nullable: true,
    }
}

// Unresolved relations are stored as NULL, so relation columns are nullable
const fn rel(column: &'static str, source_column: &'static str, target: &'static str) -> FieldDef {
    FieldDef {
        column,
        source_column,
        kind: FieldKind::Relation(target),
        nullable: true,
    }
}

const fn entity(
    name: &'static str,
    table: &'static str,
    primary_key: &'static str,
    fields: &'static [FieldDef],
) -> EntityDef {
    EntityDef {
        name,
        table,
        primary_key,
        natural_key: primary_key,
        fields,
    }
}

/// All registered PCAdb entity types
pub static ENTITIES: &[EntityDef] = &[
    entity(
        "Categories",
        "pcadb_categories",
        "category_id",
        &[
            pk("category_id", "CategoryID"),
            text("category_name", "CategoryName", false),
        ],
    ),
    entity(
        "Subcategories",
        "pcadb_subcategories",
        "sub_category_id",
        &[
            pk("sub_category_id", "SubCategoryID"),
            text("sub_category_name", "SubCategoryName", false),
        ],
    ),
    entity(
        "Positions",
        "pcadb_positions",
        "position_id",
        &[pk("position_id", "PositionID"), text("position", "Position", false)],
    ),
    entity(
        "Use",
        "pcadb_use",
        "use_id",
        &[pk("use_id", "UseID"), text("use_description", "UseDescription", false)],
    ),
    entity(
        "Alias",
        "pcadb_alias",
        "alias_id",
        &[pk("alias_id", "AliasID"), text("alias_name", "AliasName", false)],
    ),
    entity(
        "PartsDescription",
        "pcadb_parts_description",
        "parts_description_id",
        &[
            pk("parts_description_id", "PartsDescriptionID"),
            text("parts_description", "PartsDescription", false),
        ],
    ),
    entity(
        "Parts",
        "pcadb_parts",
        "part_terminology_id",
        &[
            pk("part_terminology_id", "PartTerminologyID"),
            text("part_terminology_name", "PartTerminologyName", false),
            rel("parts_description_id", "PartsDescriptionID", "PartsDescription"),
            date("rev_date", "RevDate"),
        ],
    ),
    entity(
        "MeasurementGroup",
        "pcadb_measurement_group",
        "measurement_group_id",
        &[
            pk("measurement_group_id", "MeasurementGroupID"),
            text("measurement_group_name", "MeasurementGroupName", true),
        ],
    ),
    entity(
        "MetaData",
        "pcadb_meta_data",
        "meta_id",
        &[
            pk("meta_id", "MetaID"),
            text("meta_name", "MetaName", true),
            text("meta_description", "MetaDescr", true),
            text("meta_format", "MetaFormat", true),
            text("data_type", "DataType", true),
            int("min_length", "MinLength"),
            int("max_length", "MaxLength"),
        ],
    ),
    entity(
        "MetaUOMCodes",
        "pcadb_meta_uom_codes",
        "meta_uom_id",
        &[
            pk("meta_uom_id", "MetaUOMID"),
            text("uom_code", "UOMCode", true),
            text("uom_description", "UOMDescription", true),
            text("uom_label", "UOMLabel", true),
            rel("measurement_group_id", "MeasurementGroupID", "MeasurementGroup"),
        ],
    ),
    entity(
        "PartAttributes",
        "pcadb_part_attributes",
        "pa_id",
        &[
            pk("pa_id", "PAID"),
            text("pa_name", "PAName", true),
            text("pa_description", "PADescr", true),
        ],
    ),
    entity(
        "PartAttributeAssignment",
        "pcadb_part_attribute_assignment",
        "papt_id",
        &[
            pk("papt_id", "PAPTID"),
            rel("meta_data_id", "MetaID", "MetaData"),
            rel("part_id", "PartTerminologyID", "Parts"),
            rel("part_attribute_id", "PAID", "PartAttributes"),
        ],
    ),
    entity(
        "PartPosition",
        "pcadb_part_position",
        "part_position_id",
        &[
            pk("part_position_id", "PartPositionID"),
            rel("part_id", "PartTerminologyID", "Parts"),
            rel("position_id", "PositionID", "Positions"),
            date("rev_date", "RevDate"),
        ],
    ),
    entity(
        "PartCategory",
        "pcadb_part_category",
        "part_category_id",
        &[
            pk("part_category_id", "PartCategoryID"),
            rel("part_id", "PartTerminologyID", "Parts"),
            rel("subcategory_id", "SubCategoryID", "Subcategories"),
            rel("category_id", "CategoryID", "Categories"),
        ],
    ),
    entity(
        "CodeMaster",
        "pcadb_code_master",
        "code_master_id",
        &[
            pk("code_master_id", "CodeMasterID"),
            rel("part_id", "PartTerminologyID", "Parts"),
            rel("category_id", "CategoryID", "Categories"),
            rel("subcategory_id", "SubCategoryID", "Subcategories"),
            rel("position_id", "PositionID", "Positions"),
            date("rev_date", "RevDate"),
        ],
    ),
];

/// Resolve a source table name to its destination entity type
pub fn resolve(table_name: &str) -> Option<&'static EntityDef> {
    ENTITIES.iter().find(|e| e.name == table_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_resolve_is_exact() {
        assert_eq!(resolve("Parts").map(|e| e.table), Some("pcadb_parts"));
        assert!(resolve("parts").is_none());
        assert!(resolve("PartsToAlias").is_none());
    }

    #[test]
    fn test_registry_is_consistent() {
        let names: HashSet<_> = ENTITIES.iter().map(|e| e.name).collect();
        assert_eq!(names.len(), ENTITIES.len(), "duplicate entity names");

        for entity in ENTITIES {
            let pk = entity
                .field(entity.primary_key)
                .unwrap_or_else(|| panic!("{} has no primary key field", entity.name));
            assert!(!pk.nullable, "{} primary key is nullable", entity.name);
            assert!(entity.field(entity.natural_key).is_some());

            for target in entity.fields.iter().filter_map(FieldDef::relation_target) {
                assert!(names.contains(target), "{} refers to unknown {}", entity.name, target);
            }
        }
    }

    #[test]
    fn test_dependencies() {
        let code_master = resolve("CodeMaster").unwrap();
        let deps: Vec<_> = code_master.dependencies().collect();
        assert_eq!(deps, vec!["Parts", "Categories", "Subcategories", "Positions"]);
        assert_eq!(resolve("Categories").unwrap().dependencies().count(), 0);
    }
}
