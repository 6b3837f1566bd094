use std::time::Duration;

use delaycam_types::{
    config::{CaptureConfig, MAX_DELAY_SECS, MIN_DELAY_SECS},
    Result,
};
use tracing::info;

use crate::{buffer_error, FrameRing};

/// Sampling rate and delay that together size the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelaySettings {
    frame_rate: u32,
    delay_secs: u32,
}

impl DelaySettings {
    pub fn new(frame_rate: u32, delay_secs: u32) -> Result<Self> {
        if frame_rate == 0 {
            return Err(buffer_error("frame rate must be greater than zero"));
        }
        if !(MIN_DELAY_SECS..=MAX_DELAY_SECS).contains(&delay_secs) {
            return Err(buffer_error(format!(
                "delay of {delay_secs}s outside {MIN_DELAY_SECS}..={MAX_DELAY_SECS}s"
            )));
        }
        Ok(Self {
            frame_rate,
            delay_secs,
        })
    }

    pub fn from_config(config: &CaptureConfig) -> Result<Self> {
        Self::new(config.frame_rate, config.delay_secs)
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn delay_secs(&self) -> u32 {
        self.delay_secs
    }

    /// Number of frames held, `rate * delay`.
    pub fn capacity(&self) -> usize {
        self.frame_rate as usize * self.delay_secs as usize
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.frame_rate
    }

    pub fn with_delay(self, delay_secs: u32) -> Result<Self> {
        Self::new(self.frame_rate, delay_secs)
    }
}

/// A ring sized from [`DelaySettings`], reallocated whenever they change.
#[derive(Debug)]
pub struct DelayedFeed<T> {
    settings: DelaySettings,
    ring: FrameRing<T>,
}

impl<T> DelayedFeed<T> {
    pub fn new(settings: DelaySettings) -> Result<Self> {
        Ok(Self {
            ring: FrameRing::new(settings.capacity())?,
            settings,
        })
    }

    pub fn settings(&self) -> DelaySettings {
        self.settings
    }

    pub fn push(&mut self, frame: T) {
        self.ring.push(frame);
    }

    pub fn read_delayed(&self) -> Option<&T> {
        self.ring.read_delayed()
    }

    pub fn filled(&self) -> usize {
        self.ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Changes the delay. Buffered frames are discarded; returns false when
    /// the delay is unchanged and nothing was reset.
    pub fn set_delay(&mut self, delay_secs: u32) -> Result<bool> {
        if delay_secs == self.settings.delay_secs {
            return Ok(false);
        }
        let settings = self.settings.with_delay(delay_secs)?;
        self.reconfigure(settings)?;
        Ok(true)
    }

    pub fn reconfigure(&mut self, settings: DelaySettings) -> Result<()> {
        let ring = FrameRing::new(settings.capacity())?;
        info!(
            dropped = self.ring.len(),
            capacity = settings.capacity(),
            "delay set to {}s at {} fps; buffer reset",
            settings.delay_secs,
            settings.frame_rate
        );
        self.ring = ring;
        self.settings = settings;
        Ok(())
    }
}
