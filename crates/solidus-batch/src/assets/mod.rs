//! Digital asset records and the `asset_processing` task

pub mod handler;
pub mod processor;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;

pub use handler::{AssetProcessingHandler, ASSET_PROCESSING_TASK};
pub use processor::{ImageMagickProcessor, ImageProcessor, ProcessedImage, ThumbnailSize};

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Asset file {0} not found")]
    NotFound(i64),

    #[error("Source file missing: {0}")]
    SourceMissing(String),

    /// External image tool exited non-zero or could not be started
    #[error("{tool} failed: {message}")]
    Processor { tool: String, message: String },

    #[error("Asset query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AssetError {
    pub fn processor(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processor {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

pub type AssetResult<T> = Result<T, AssetError>;

/// Processing state of an asset file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

/// An asset file joined with the fields of its asset the handler needs
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AssetFile {
    pub id: i64,
    pub asset_id: i64,
    pub asset_title: String,
    pub asset_type: String,
    /// Path relative to the media root
    pub file_path: String,
    pub processed_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub is_processed: bool,
    pub processing_status: String,
    pub processing_error: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl AssetFile {
    pub fn is_image(&self) -> bool {
        self.asset_type == "image"
    }
}

#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn find_file(&self, id: i64) -> AssetResult<Option<AssetFile>>;

    async fn mark_processing(&self, id: i64) -> AssetResult<()>;

    async fn mark_processed(&self, id: i64, processed: &ProcessedImage) -> AssetResult<()>;

    async fn mark_failed(&self, id: i64, error: &str) -> AssetResult<()>;
}

#[derive(Clone)]
pub struct PgAssetRepository {
    pool: PgPool,
}

impl PgAssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetRepository for PgAssetRepository {
    async fn find_file(&self, id: i64) -> AssetResult<Option<AssetFile>> {
        let file = sqlx::query_as::<_, AssetFile>(
            r#"
            SELECT f.id, f.asset_id, a.title AS asset_title, a.asset_type,
                   f.file_path, f.processed_path, f.thumbnail_path, f.is_processed,
                   f.processing_status, f.processing_error, f.width, f.height
            FROM asset_files f
            JOIN assets a ON a.id = f.asset_id
            WHERE f.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(file)
    }

    async fn mark_processing(&self, id: i64) -> AssetResult<()> {
        sqlx::query(
            "UPDATE asset_files SET processing_status = $2, processing_error = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(ProcessingStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_processed(&self, id: i64, processed: &ProcessedImage) -> AssetResult<()> {
        sqlx::query(
            r#"
            UPDATE asset_files
            SET processed_path = $2,
                thumbnail_path = $3,
                width = COALESCE($4, width),
                height = COALESCE($5, height),
                is_processed = TRUE,
                processing_status = $6,
                processing_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&processed.processed_path)
        .bind(processed.thumbnail_path())
        .bind(processed.width)
        .bind(processed.height)
        .bind(ProcessingStatus::Completed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> AssetResult<()> {
        sqlx::query(
            "UPDATE asset_files SET processing_status = $2, processing_error = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(ProcessingStatus::Failed.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
