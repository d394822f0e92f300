//! PostgreSQL destination for migrated PCAdb entities

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{Postgres, QueryBuilder, Row};

use super::error::{MigrationError, MigrationResult};
use super::loader::DestinationStore;
use super::schema::{EntityDef, FieldDef, FieldKind};
use super::transform::{Entity, RelationLookup};
use super::value::FieldValue;

#[derive(Clone)]
pub struct PgDestination {
    pool: PgPool,
}

impl PgDestination {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn column_list(def: &EntityDef) -> String {
    def.fields
        .iter()
        .map(|f| format!("\"{}\"", f.column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn decode_field(row: &PgRow, index: usize, field: &FieldDef) -> Result<FieldValue, sqlx::Error> {
    Ok(match field.kind {
        FieldKind::Integer | FieldKind::Relation(_) => row.try_get::<Option<i64>, _>(index)?.into(),
        FieldKind::Text => row.try_get::<Option<String>, _>(index)?.into(),
        FieldKind::Date => row.try_get::<Option<NaiveDate>, _>(index)?.into(),
    })
}

fn bind_field(values: &mut Separated<'_, '_, Postgres, &'static str>, field: &FieldDef, value: &FieldValue) {
    match (value, field.kind) {
        (FieldValue::Null, FieldKind::Text) => values.push_bind(None::<String>),
        (FieldValue::Null, FieldKind::Date) => values.push_bind(None::<NaiveDate>),
        (FieldValue::Null, _) => values.push_bind(None::<i64>),
        (FieldValue::Int(v), _) => values.push_bind(*v),
        (FieldValue::Date(d), _) => values.push_bind(*d),
        (other, FieldKind::Date) => values.push_bind(other.as_date()),
        (other, FieldKind::Text) => values.push_bind(other.as_text()),
        (other, _) => values.push_bind(other.as_i64()),
    };
}

#[async_trait]
impl DestinationStore for PgDestination {
    async fn existing(
        &self,
        def: &'static EntityDef,
        keys: &[i64],
    ) -> MigrationResult<HashMap<i64, Vec<FieldValue>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"{}\" = ANY($1)",
            column_list(def),
            def.table,
            def.primary_key
        );
        let rows = sqlx::query(&sql)
            .bind(keys)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrationError::destination(def.table, e))?;

        let pk_index = def.primary_key_index();
        let mut existing = HashMap::with_capacity(rows.len());
        for row in &rows {
            let values = def
                .fields
                .iter()
                .enumerate()
                .map(|(i, field)| decode_field(row, i, field))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| MigrationError::destination(def.table, e))?;
            if let Some(key) = values[pk_index].as_i64() {
                existing.insert(key, values);
            }
        }

        Ok(existing)
    }

    async fn insert_ignore(&self, def: &'static EntityDef, rows: &[Entity]) -> Result<u64, sqlx::Error> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO \"{}\" ({}) ", def.table, column_list(def)));
        builder.push_values(rows, |mut values, entity| {
            for (field, value) in def.fields.iter().zip(&entity.values) {
                bind_field(&mut values, field, value);
            }
        });
        builder.push(format!(" ON CONFLICT (\"{}\") DO NOTHING", def.primary_key));

        let mut tx = self.pool.begin().await?;
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RelationLookup for PgDestination {
    async fn exists(&self, entity: &'static EntityDef, key: i64) -> MigrationResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM \"{}\" WHERE \"{}\" = $1)",
            entity.table, entity.natural_key
        );
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrationError::destination(entity.table, e))
    }
}
