//! Device configuration file support

use crate::audio::AudioFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Device configuration loaded from TOML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device name (used for the shared block backing file)
    pub name: String,

    /// Loopback region size in KiB
    pub loopback_kib: usize,

    /// Cap on total dedicated stream-buffer KiB (absent = unlimited)
    pub dedicated_limit_kib: Option<usize>,

    /// Active format: "pcm16" or "float32"
    pub format: String,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    #[serde(default)]
    pub log_file: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "vadev0".to_string(),
            loopback_kib: 128,
            dedicated_limit_kib: None,
            format: "pcm16".to_string(),
            log_level: "info".to_string(),
            log_file: String::new(),
        }
    }
}

impl DeviceConfig {
    /// Loopback region size in bytes
    pub fn loopback_bytes(&self) -> usize {
        self.loopback_kib * 1024
    }

    /// Dedicated allocation cap in bytes, if configured
    pub fn dedicated_limit(&self) -> Option<usize> {
        self.dedicated_limit_kib.map(|kib| kib * 1024)
    }

    /// The configured format; unknown names fall back to 16-bit PCM
    pub fn format(&self) -> AudioFormat {
        match self.format.as_str() {
            "float32" => AudioFormat::FLOAT32_STEREO_48K,
            _ => AudioFormat::PCM16_STEREO_48K,
        }
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as executable: vadev.toml
    /// 2. User config dir: vadev/config.toml
    ///
    /// Falls back to defaults when neither exists.
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let config_path = exe_dir.join("vadev.toml");
                if config_path.exists() {
                    return Self::load(&config_path);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("vadev").join("config.toml");
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        Ok(Self::default())
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}
