//! Product category taxonomy fed from AutoCare PCAdb

pub mod import;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;

use crate::etl::MigrationError;

pub use import::{CategoryImporter, DiffSummary, HierarchySummary, ImportReport};

#[derive(Error, Debug)]
pub enum CategoryError {
    #[error("Category query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Source(#[from] MigrationError),
}

pub type CategoryResult<T> = Result<T, CategoryError>;

/// PCAdb table a category was imported from
///
/// `CategoryID` and `SubCategoryID` are independent sequences, so an imported
/// row is identified by the table and the id together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    Category,
    Subcategory,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Subcategory => "subcategory",
        }
    }
}

impl std::fmt::Display for CategorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CategorySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category" => Ok(Self::Category),
            "subcategory" => Ok(Self::Subcategory),
            other => Err(format!("unknown category source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: i64,
    /// `category` or `subcategory`; NULL for categories created elsewhere
    pub pcadb_source: Option<String>,
    pub pcadb_id: Option<i64>,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<i64>,
}

impl Category {
    /// PCAdb identity of an imported category
    pub fn source_key(&self) -> Option<(CategorySource, i64)> {
        let source = self.pcadb_source.as_deref()?.parse().ok()?;
        Some((source, self.pcadb_id?))
    }
}

/// Values for a category created by the importer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    pub source: CategorySource,
    pub pcadb_id: i64,
    pub name: String,
    pub slug: String,
    pub image: String,
    pub sort_order: i32,
    pub meta_title: String,
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn all(&self) -> CategoryResult<Vec<Category>>;

    /// Insert an imported category; a row with the same source key is left alone
    async fn insert(&self, category: &NewCategory) -> CategoryResult<()>;

    async fn rename(&self, id: i64, name: &str) -> CategoryResult<()>;

    async fn set_parent(&self, id: i64, parent_id: i64) -> CategoryResult<()>;
}

#[derive(Clone)]
pub struct PgCategoryStore {
    pool: PgPool,
}

impl PgCategoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CategoryStore for PgCategoryStore {
    async fn all(&self) -> CategoryResult<Vec<Category>> {
        Ok(sqlx::query_as::<_, Category>(
            "SELECT id, pcadb_source, pcadb_id, name, slug, parent_id FROM categories ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert(&self, category: &NewCategory) -> CategoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO categories
                (pcadb_source, pcadb_id, name, slug, parent_id, description, image, sort_order,
                 is_active, meta_title, meta_description)
            VALUES ($1, $2, $3, $4, NULL, '', $5, $6, TRUE, $7, '')
            ON CONFLICT (pcadb_source, pcadb_id) DO NOTHING
            "#,
        )
        .bind(category.source.as_str())
        .bind(category.pcadb_id)
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.image)
        .bind(category.sort_order)
        .bind(&category.meta_title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rename(&self, id: i64, name: &str) -> CategoryResult<()> {
        sqlx::query("UPDATE categories SET name = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_parent(&self, id: i64, parent_id: i64) -> CategoryResult<()> {
        sqlx::query("UPDATE categories SET parent_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(parent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
