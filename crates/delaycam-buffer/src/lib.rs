//! Frame delay buffering: a fixed-capacity ring keyed to rate and delay.

mod feed;
mod ring;

pub use feed::{DelaySettings, DelayedFeed};
pub use ring::FrameRing;

use delaycam_types::DelaycamError;

pub fn buffer_error(message: impl Into<String>) -> DelaycamError {
    DelaycamError::Buffer(message.into())
}
