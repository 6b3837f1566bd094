use thiserror::Error;

pub type Result<T, E = DelaycamError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum DelaycamError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("capture error: {0}")]
    Capture(String),
    #[error("buffer error: {0}")]
    Buffer(String),
    #[error("render error: {0}")]
    Render(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("worker error: {0}")]
    Worker(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
