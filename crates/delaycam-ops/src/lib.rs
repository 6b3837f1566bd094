//! Operational helpers: logging setup and on-disk state directories.

use std::path::PathBuf;

use delaycam_types::{config::OpsConfig, DelaycamError, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| DelaycamError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| DelaycamError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

pub fn ensure_state_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    std::fs::create_dir_all(&dir)
        .map_err(|err| DelaycamError::Ops(format!("failed to create {path}: {err}")))?;
    info!("State directory ready at {:?}", dir);
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_dir_is_created() {
        let root = tempfile::tempdir().expect("tempdir");
        let nested = root.path().join("cache").join("v1");
        let path = ensure_state_dir(nested.to_str().unwrap()).unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn second_init_reports_error() {
        let config = OpsConfig {
            log_level: "not a [valid filter".into(),
        };
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
