//! Presentation of delayed frames.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use delaycam_types::{
    frame::{FrameSlot, ImageFrame},
    viewport::Viewport,
    DelaycamError, Result,
};
use image::{imageops, ImageBuffer, ImageFormat, Rgba, RgbaImage};
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub presented: u64,
    pub waiting: u64,
}

#[async_trait]
pub trait FrameSink: Send {
    /// Show a delayed frame through the given viewport.
    async fn present(&mut self, slot: &FrameSlot, viewport: &Viewport) -> Result<()>;
    /// Called on ticks where the buffer has not yet filled.
    async fn waiting(&mut self, filled: usize, capacity: usize) -> Result<()>;
    fn stats(&self) -> RenderStats;
}

#[async_trait]
impl FrameSink for Box<dyn FrameSink> {
    async fn present(&mut self, slot: &FrameSlot, viewport: &Viewport) -> Result<()> {
        (**self).present(slot, viewport).await
    }

    async fn waiting(&mut self, filled: usize, capacity: usize) -> Result<()> {
        (**self).waiting(filled, capacity).await
    }

    fn stats(&self) -> RenderStats {
        (**self).stats()
    }
}

/// Writes the most recent delayed frame to a PNG file, replacing it each tick.
pub struct PngSink {
    output: PathBuf,
    stats: RenderStats,
}

impl PngSink {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            output: output.as_ref().to_path_buf(),
            stats: RenderStats::default(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

#[async_trait]
impl FrameSink for PngSink {
    async fn present(&mut self, slot: &FrameSlot, viewport: &Viewport) -> Result<()> {
        let image = apply_viewport(&slot.frame, viewport)?;
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| render_error(format!("output dir {:?}: {err}", parent)))?;
        }
        let mut encoded = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
            .map_err(|err| render_error(format!("failed to encode frame: {err}")))?;
        // Written beside the target and renamed so readers never see a partial file.
        let staging = self.output.with_extension("png.partial");
        fs::write(&staging, &encoded)
            .await
            .map_err(|err| render_error(format!("failed to write frame: {err}")))?;
        fs::rename(&staging, &self.output)
            .await
            .map_err(|err| render_error(format!("failed to publish frame: {err}")))?;
        self.stats.presented += 1;
        debug!(
            sequence = slot.sequence,
            zoom = viewport.zoom(),
            "Presented delayed frame captured at {}",
            slot.captured_at().format("%H:%M:%S%.3f")
        );
        Ok(())
    }

    async fn waiting(&mut self, filled: usize, capacity: usize) -> Result<()> {
        self.stats.waiting += 1;
        if filled == 1 || filled % 50 == 0 {
            info!("Filling delay buffer: {}/{} frames", filled, capacity);
        }
        Ok(())
    }

    fn stats(&self) -> RenderStats {
        self.stats
    }
}

/// Crops the frame to the viewport and scales the crop back to full size.
pub fn apply_viewport(frame: &ImageFrame, viewport: &Viewport) -> Result<RgbaImage> {
    let buffer = frame
        .is_well_formed()
        .then(|| {
            ImageBuffer::<Rgba<u8>, _>::from_raw(frame.width, frame.height, frame.data.clone())
        })
        .flatten()
        .ok_or_else(|| {
            render_error(format!(
                "frame buffer of {} bytes does not match {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            ))
        })?;
    if viewport.is_identity() {
        return Ok(buffer);
    }
    let rect = viewport.crop_rect(frame.width, frame.height);
    let cropped = imageops::crop_imm(&buffer, rect.x, rect.y, rect.width, rect.height).to_image();
    Ok(imageops::resize(
        &cropped,
        frame.width,
        frame.height,
        imageops::FilterType::Nearest,
    ))
}

pub fn render_error(message: impl Into<String>) -> DelaycamError {
    DelaycamError::Render(message.into())
}
