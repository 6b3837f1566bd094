use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{DelaycamError, Result};

pub const MIN_DELAY_SECS: u32 = 10;
pub const MAX_DELAY_SECS: u32 = 120;

/// Where frames are sampled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Generated test pattern.
    Synthetic { width: u32, height: u32 },
    /// Looping sequence of PNG files in a directory.
    ImageSequence { dir: String },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Synthetic {
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub frame_rate: u32,
    pub delay_secs: u32,
    #[serde(default)]
    pub source: SourceConfig,
    pub output_path: String,
    #[serde(default = "default_zoom")]
    pub zoom: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Shared prefix of every cache this app creates.
    pub cache_prefix: String,
    /// Current version tag; the live cache is `<prefix>-<version>`.
    pub version: String,
    pub origin: String,
    pub assets: Vec<String>,
    pub cache_dir: String,
}

impl OfflineConfig {
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin).map_err(|err| {
            DelaycamError::Configuration(format!("invalid origin {}: {err}", self.origin))
        })
    }

    pub fn default_assets() -> Vec<String> {
        let mut assets = vec![
            "/".to_string(),
            "/index.html".to_string(),
            "/manifest.json".to_string(),
        ];
        for size in [72, 96, 128, 144, 152, 192, 384, 512] {
            assets.push(format!("/icons/icon-{size}x{size}.png"));
        }
        assets
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelaycamConfig {
    pub capture: CaptureConfig,
    pub offline: OfflineConfig,
    pub network: NetworkConfig,
    pub ops: OpsConfig,
}

impl DelaycamConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            DelaycamError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            DelaycamError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.frame_rate == 0 {
            return Err(DelaycamError::Configuration(
                "capture.frame_rate must be greater than zero".into(),
            ));
        }
        if !(MIN_DELAY_SECS..=MAX_DELAY_SECS).contains(&self.capture.delay_secs) {
            return Err(DelaycamError::Configuration(format!(
                "capture.delay_secs must be between {MIN_DELAY_SECS} and {MAX_DELAY_SECS}"
            )));
        }
        if !(self.capture.zoom.is_finite() && self.capture.zoom >= 1.0) {
            return Err(DelaycamError::Configuration(
                "capture.zoom must be at least 1.0".into(),
            ));
        }
        if let SourceConfig::Synthetic { width, height } = self.capture.source {
            if width == 0 || height == 0 {
                return Err(DelaycamError::Configuration(
                    "capture.source dimensions must be non-zero".into(),
                ));
            }
        }
        if self.offline.cache_prefix.is_empty() || self.offline.version.is_empty() {
            return Err(DelaycamError::Configuration(
                "offline.cache_prefix and offline.version must not be empty".into(),
            ));
        }
        let origin = self.offline.origin_url()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(DelaycamError::Configuration(
                "offline.origin must be an http(s) URL".into(),
            ));
        }
        if let Some(asset) = self.offline.assets.iter().find(|a| !a.starts_with('/')) {
            return Err(DelaycamError::Configuration(format!(
                "offline.assets entries must be absolute paths: {asset}"
            )));
        }
        Ok(())
    }
}

impl Default for DelaycamConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                frame_rate: 15,
                delay_secs: 10,
                source: SourceConfig::default(),
                output_path: "delayed.png".into(),
                zoom: default_zoom(),
            },
            offline: OfflineConfig {
                cache_prefix: "delaycam".into(),
                version: "v1".into(),
                origin: "http://127.0.0.1:8000".into(),
                assets: OfflineConfig::default_assets(),
                cache_dir: "offline_cache".into(),
            },
            network: NetworkConfig {
                bind_addr: "127.0.0.1:3000".into(),
            },
            ops: OpsConfig {
                log_level: "info".into(),
            },
        }
    }
}

fn default_zoom() -> f32 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_config_from_file() {
        let temp_path = std::env::temp_dir().join("delaycam-config-test.toml");
        let mut config = DelaycamConfig::default();
        config.capture.delay_secs = 45;
        config.capture.source = SourceConfig::ImageSequence {
            dir: "frames".into(),
        };
        config.offline.version = "v7".into();

        let doc = toml::to_string(&config).expect("serialize config");
        fs::write(&temp_path, doc).expect("write temp config");

        let loaded = DelaycamConfig::from_file(&temp_path).expect("load config");
        assert_eq!(loaded.capture.delay_secs, 45);
        assert_eq!(loaded.capture.source, config.capture.source);
        assert_eq!(loaded.offline.cache_name(), "delaycam-v7");
        assert_eq!(loaded.offline.assets.len(), 11);
        fs::remove_file(&temp_path).expect("cleanup temp config");
    }

    #[test]
    fn validate_configuration_rules() {
        let mut config = DelaycamConfig::default();
        assert!(config.validate().is_ok());

        config.capture.frame_rate = 0;
        assert!(config.validate().is_err());
        config.capture.frame_rate = 30;
        config.capture.delay_secs = 9;
        assert!(config.validate().is_err());
        config.capture.delay_secs = 121;
        assert!(config.validate().is_err());
        config.capture.delay_secs = 120;
        config.capture.zoom = 0.5;
        assert!(config.validate().is_err());
        config.capture.zoom = 2.0;
        config.offline.origin = "ftp://example.com".into();
        assert!(config.validate().is_err());
        config.offline.origin = "https://example.com".into();
        config.offline.assets.push("icons/missing-slash.png".into());
        assert!(config.validate().is_err());
        config.offline.assets.pop();
        config.offline.version.clear();
        assert!(config.validate().is_err());
        config.offline.version = "v2".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_manifest_lists_root_and_icons() {
        let assets = OfflineConfig::default_assets();
        assert_eq!(assets[0], "/");
        assert!(assets.contains(&"/manifest.json".to_string()));
        assert!(assets.contains(&"/icons/icon-192x192.png".to_string()));
    }
}
