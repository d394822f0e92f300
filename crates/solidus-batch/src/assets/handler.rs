use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;

use super::processor::ImageProcessor;
use super::{AssetError, AssetRepository};
use crate::tasks::{Task, TaskHandler};

pub const ASSET_PROCESSING_TASK: &str = "asset_processing";

/// Generates processed versions and thumbnails for an uploaded asset file
///
/// Payload: `{"asset_file_id": <int>}`. Non-image assets complete without
/// producing variants.
pub struct AssetProcessingHandler {
    repository: Arc<dyn AssetRepository>,
    processor: Arc<dyn ImageProcessor>,
}

impl AssetProcessingHandler {
    pub fn new(repository: Arc<dyn AssetRepository>, processor: Arc<dyn ImageProcessor>) -> Self {
        Self {
            repository,
            processor,
        }
    }
}

fn asset_file_id(task: &Task) -> Option<i64> {
    let value = task.task_data.get("asset_file_id")?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .filter(|id| *id > 0)
}

#[async_trait]
impl TaskHandler for AssetProcessingHandler {
    fn task_type(&self) -> &'static str {
        ASSET_PROCESSING_TASK
    }

    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        let Some(file_id) = asset_file_id(task) else {
            bail!("No asset_file_id in task data");
        };

        let file = self
            .repository
            .find_file(file_id)
            .await?
            .ok_or(AssetError::NotFound(file_id))?;

        tracing::info!(asset_file_id = file_id, title = %file.asset_title, "Processing asset");

        if !file.is_image() {
            tracing::debug!(asset_file_id = file_id, asset_type = %file.asset_type, "Not an image, nothing to generate");
            return Ok(json!({
                "asset_id": file.asset_id,
                "processed_path": file.processed_path,
                "thumbnail_path": file.thumbnail_path,
            }));
        }

        self.repository.mark_processing(file_id).await?;

        let processed = match self.processor.process(&file.file_path).await {
            Ok(processed) => processed,
            Err(e) => {
                let message = e.to_string();
                self.repository.mark_failed(file_id, &message).await?;
                return Err(e.into());
            }
        };

        if let Err(e) = self.repository.mark_processed(file_id, &processed).await {
            let message = format!("Recording processed variants failed: {}", e);
            if let Err(mark) = self.repository.mark_failed(file_id, &message).await {
                tracing::error!(asset_file_id = file_id, error = %mark, "Could not mark asset file failed");
            }
            return Err(e.into());
        }

        Ok(json!({
            "asset_id": file.asset_id,
            "processed_path": processed.processed_path,
            "thumbnail_path": processed.thumbnail_path(),
            "width": processed.width,
            "height": processed.height,
        }))
    }
}
