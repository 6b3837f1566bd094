//! Frame source abstraction layer.

mod sequence;

pub use sequence::ImageSequenceSource;

use async_trait::async_trait;
use delaycam_types::{config::SourceConfig, frame::ImageFrame, DelaycamError, Result};
use tracing::info;

/// Aggregated capture counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMetrics {
    pub captured: u64,
    pub failed: u64,
}

#[async_trait]
pub trait FrameSource: Send {
    async fn open(&mut self) -> Result<()>;
    async fn capture_frame(&mut self) -> Result<ImageFrame>;
    fn metrics(&self) -> CaptureMetrics;
}

#[async_trait]
impl FrameSource for Box<dyn FrameSource> {
    async fn open(&mut self) -> Result<()> {
        (**self).open().await
    }

    async fn capture_frame(&mut self) -> Result<ImageFrame> {
        (**self).capture_frame().await
    }

    fn metrics(&self) -> CaptureMetrics {
        (**self).metrics()
    }
}

/// Generated test pattern standing in for a camera.
///
/// A vertical bar sweeps across the frame once per 64 samples and the
/// background brightness encodes the low byte of the sample counter.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    counter: u64,
    metrics: CaptureMetrics,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            counter: 0,
            metrics: CaptureMetrics::default(),
        }
    }

    fn render(&self) -> Vec<u8> {
        let shade = (self.counter & 0xff) as u8;
        let bar_width = (self.width / 16).max(1);
        let bar_x = ((self.counter % 64) as u32 * self.width) / 64;
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for _y in 0..self.height {
            for x in 0..self.width {
                if x >= bar_x && x < bar_x + bar_width {
                    data.extend_from_slice(&[255, 255, 255, 255]);
                } else {
                    data.extend_from_slice(&[shade, shade / 2, 255 - shade, 255]);
                }
            }
        }
        data
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn open(&mut self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(capture_error("synthetic source needs non-zero dimensions"));
        }
        info!("Opening synthetic source {}x{}", self.width, self.height);
        Ok(())
    }

    async fn capture_frame(&mut self) -> Result<ImageFrame> {
        let frame = ImageFrame::from_rgba(self.width, self.height, self.render());
        self.counter += 1;
        self.metrics.captured += 1;
        Ok(frame)
    }

    fn metrics(&self) -> CaptureMetrics {
        self.metrics
    }
}

/// Build the source described by the capture configuration.
pub fn source_from_config(config: &SourceConfig) -> Box<dyn FrameSource> {
    match config {
        SourceConfig::Synthetic { width, height } => {
            Box::new(SyntheticSource::new(*width, *height))
        }
        SourceConfig::ImageSequence { dir } => Box::new(ImageSequenceSource::new(dir)),
    }
}

/// Generate an error aligned with capture semantics.
pub fn capture_error(message: impl Into<String>) -> DelaycamError {
    DelaycamError::Capture(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_frames_are_well_formed() {
        let mut source = SyntheticSource::new(32, 8);
        source.open().await.unwrap();
        let first = source.capture_frame().await.unwrap();
        let second = source.capture_frame().await.unwrap();
        assert!(first.is_well_formed());
        assert_eq!((first.width, first.height), (32, 8));
        assert_ne!(first.data, second.data);
        assert_eq!(source.metrics().captured, 2);
    }

    #[tokio::test]
    async fn synthetic_rejects_empty_dimensions() {
        let mut source = SyntheticSource::new(0, 10);
        assert!(source.open().await.is_err());
    }

    #[tokio::test]
    async fn boxed_source_from_config() {
        let mut source = source_from_config(&SourceConfig::Synthetic {
            width: 4,
            height: 4,
        });
        source.open().await.unwrap();
        let frame = source.capture_frame().await.unwrap();
        assert_eq!(frame.data.len(), 64);
        assert_eq!(source.metrics().captured, 1);
    }
}
