//! Shared domain types for the delaycam project.

pub mod config;
pub mod frame;
pub mod viewport;

mod errors;

pub use errors::{DelaycamError, Result};
