use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFrame {
    pub width: u32,
    pub height: u32,
    /// Raw RGBA pixel buffer, row-major, `width * height * 4` bytes.
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl ImageFrame {
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
            captured_at: Utc::now(),
        }
    }

    /// Non-zero dimensions with a buffer of exactly `width * height * 4` bytes.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 4
    }
}

/// One sampled frame as stored in the delay ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSlot {
    /// Monotonic sample number, starting at zero for each feed.
    pub sequence: u64,
    pub frame: ImageFrame,
}

impl FrameSlot {
    pub fn new(sequence: u64, frame: ImageFrame) -> Self {
        Self { sequence, frame }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.frame.captured_at
    }
}
