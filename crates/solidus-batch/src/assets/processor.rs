//! Image variants through ImageMagick
//!
//! For `products/brake.jpg` the processor writes `products/brake_processed.jpg`
//! and one `products/brake_thumb_<size>.jpg` per configured thumbnail size,
//! all relative to the media root.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use super::{AssetError, AssetResult};

/// Default ImageMagick binary
pub const DEFAULT_IMAGEMAGICK_PATH: &str = "convert";

/// Bounding box for the processed version
pub const PROCESSED_MAX_DIMENSION: u32 = 2048;
pub const PROCESSED_QUALITY: u32 = 90;
pub const THUMBNAIL_QUALITY: u32 = 80;

/// Thumbnail name used for `thumbnail_path`
pub const PRIMARY_THUMBNAIL: &str = "small";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThumbnailSize {
    pub name: String,
    pub size: u32,
}

impl ThumbnailSize {
    pub fn new(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    pub fn defaults() -> Vec<ThumbnailSize> {
        vec![
            ThumbnailSize::new("small", 150),
            ThumbnailSize::new("medium", 300),
            ThumbnailSize::new("large", 600),
        ]
    }
}

/// Paths are relative to the media root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedImage {
    pub processed_path: String,
    pub thumbnails: Vec<(String, String)>,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl ProcessedImage {
    pub fn thumbnail_path(&self) -> Option<&str> {
        self.thumbnails
            .iter()
            .find(|(name, _)| name == PRIMARY_THUMBNAIL)
            .or_else(|| self.thumbnails.first())
            .map(|(_, path)| path.as_str())
    }
}

#[async_trait]
pub trait ImageProcessor: Send + Sync {
    /// Produce the processed version and thumbnails for `file_path`
    async fn process(&self, file_path: &str) -> AssetResult<ProcessedImage>;
}

/// `<base><suffix><ext>` for a relative media path
pub fn variant_path(file_path: &str, suffix: &str) -> String {
    let path = Path::new(file_path);
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.join(name).to_string_lossy().into_owned()
        }
        _ => name,
    }
}

pub struct ImageMagickProcessor {
    convert: PathBuf,
    media_root: PathBuf,
    thumbnails: Vec<ThumbnailSize>,
}

impl ImageMagickProcessor {
    pub fn new(convert: impl Into<PathBuf>, media_root: impl Into<PathBuf>) -> Self {
        Self {
            convert: convert.into(),
            media_root: media_root.into(),
            thumbnails: ThumbnailSize::defaults(),
        }
    }

    pub fn with_thumbnails(mut self, thumbnails: Vec<ThumbnailSize>) -> Self {
        self.thumbnails = thumbnails;
        self
    }

    /// `magick identify` for ImageMagick 7, sibling `identify` otherwise
    fn identify_command(&self) -> Command {
        let is_magick = self
            .convert
            .file_stem()
            .map_or(false, |stem| stem.eq_ignore_ascii_case("magick"));

        if is_magick {
            let mut cmd = Command::new(&self.convert);
            cmd.arg("identify");
            cmd
        } else {
            Command::new(self.convert.with_file_name("identify"))
        }
    }

    async fn run(&self, mut cmd: Command, tool: &str) -> AssetResult<String> {
        let output = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AssetError::processor(tool, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(AssetError::processor(
                tool,
                format!("exit status {}: {}", output.status, stderr),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn resize(&self, input: &Path, output: &Path) -> AssetResult<()> {
        let mut cmd = Command::new(&self.convert);
        cmd.arg(input)
            .args(["-auto-orient", "-strip", "-resize"])
            .arg(format!("{0}x{0}>", PROCESSED_MAX_DIMENSION))
            .arg("-quality")
            .arg(PROCESSED_QUALITY.to_string())
            .arg(output);
        self.run(cmd, "convert").await.map(|_| ())
    }

    async fn thumbnail(&self, input: &Path, output: &Path, size: u32) -> AssetResult<()> {
        let mut cmd = Command::new(&self.convert);
        cmd.arg(input)
            .args(["-auto-orient", "-strip", "-thumbnail"])
            .arg(format!("{0}x{0}^", size))
            .args(["-gravity", "center", "-extent"])
            .arg(format!("{0}x{0}", size))
            .arg("-quality")
            .arg(THUMBNAIL_QUALITY.to_string())
            .arg(output);
        self.run(cmd, "convert").await.map(|_| ())
    }

    async fn dimensions(&self, input: &Path) -> Option<(i32, i32)> {
        let mut cmd = self.identify_command();
        // First frame only, animated images report one size per frame
        let mut frame = input.as_os_str().to_owned();
        frame.push("[0]");
        cmd.args(["-format", "%w %h"]).arg(frame);

        match self.run(cmd, "identify").await {
            Ok(out) => parse_dimensions(&out),
            Err(e) => {
                tracing::warn!(path = %input.display(), error = %e, "Could not read image dimensions");
                None
            }
        }
    }
}

fn parse_dimensions(output: &str) -> Option<(i32, i32)> {
    let mut parts = output.split_whitespace();
    let width = parts.next()?.parse().ok()?;
    let height = parts.next()?.parse().ok()?;
    Some((width, height))
}

#[async_trait]
impl ImageProcessor for ImageMagickProcessor {
    async fn process(&self, file_path: &str) -> AssetResult<ProcessedImage> {
        let input = self.media_root.join(file_path);
        if tokio::fs::metadata(&input).await.is_err() {
            return Err(AssetError::SourceMissing(input.display().to_string()));
        }

        let processed_path = variant_path(file_path, "_processed");
        self.resize(&input, &self.media_root.join(&processed_path)).await?;

        let mut thumbnails = Vec::with_capacity(self.thumbnails.len());
        for thumb in &self.thumbnails {
            let thumb_path = variant_path(file_path, &format!("_thumb_{}", thumb.name));
            self.thumbnail(&input, &self.media_root.join(&thumb_path), thumb.size)
                .await?;
            thumbnails.push((thumb.name.clone(), thumb_path));
        }

        let (width, height) = match self.dimensions(&input).await {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        };

        tracing::debug!(
            file_path,
            processed_path = %processed_path,
            thumbnails = thumbnails.len(),
            "Image variants written"
        );

        Ok(ProcessedImage {
            processed_path,
            thumbnails,
            width,
            height,
        })
    }
}
