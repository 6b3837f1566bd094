use std::path::{Path, PathBuf};

use async_trait::async_trait;
use delaycam_types::{frame::ImageFrame, Result};
use image::ImageFormat;
use tokio::fs;
use tracing::{debug, info};

use crate::{capture_error, CaptureMetrics, FrameSource};

/// Replays the PNG files of a directory in name order, looping forever.
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    metrics: CaptureMetrics,
}

impl ImageSequenceSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            files: Vec::new(),
            position: 0,
            metrics: CaptureMetrics::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    async fn decode(&self, path: &Path) -> Result<ImageFrame> {
        let raw = fs::read(path)
            .await
            .map_err(|err| capture_error(format!("failed to read {}: {err}", path.display())))?;
        let img = image::load_from_memory_with_format(&raw, ImageFormat::Png)
            .map_err(|err| capture_error(format!("failed to decode {}: {err}", path.display())))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(ImageFrame::from_rgba(width, height, rgba.into_raw()))
    }
}

#[async_trait]
impl FrameSource for ImageSequenceSource {
    async fn open(&mut self) -> Result<()> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(|err| {
            capture_error(format!(
                "cannot list frame directory {}: {err}",
                self.dir.display()
            ))
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| capture_error(format!("directory read failed: {err}")))?
        {
            let path = entry.path();
            let is_png = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("png"))
                .unwrap_or(false);
            if is_png {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(capture_error(format!(
                "no PNG frames found in {}",
                self.dir.display()
            )));
        }
        files.sort();
        info!(
            "Opened image sequence {} ({} frames)",
            self.dir.display(),
            files.len()
        );
        self.files = files;
        self.position = 0;
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<ImageFrame> {
        let Some(path) = self.files.get(self.position).cloned() else {
            return Err(capture_error("image sequence not opened"));
        };
        self.position = (self.position + 1) % self.files.len();

        match self.decode(&path).await {
            Ok(frame) => {
                debug!("Captured {}", path.display());
                self.metrics.captured += 1;
                Ok(frame)
            }
            Err(err) => {
                self.metrics.failed += 1;
                Err(err)
            }
        }
    }

    fn metrics(&self) -> CaptureMetrics {
        self.metrics
    }
}
