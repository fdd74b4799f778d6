//! Runtime configuration.
//!
//! A [`RuntimeConfig`] is handed to [`Runtime::startup`](crate::Runtime::startup).
//! It can be built in code or loaded from a TOML file:
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! report_leaks = false                # Warn about live handles at shutdown
//! collect_stats = true                # Count calls and failures per operation
//! default_interpolator = "bilinear"   # Used by affine when no interpolate is given
//!
//! [save]
//! jpeg_quality = 75                   # Default Q for jpeg and heif savers (1-100)
//! png_compression = 6                 # Default compression for png savers (0-9)
//! heif_speed = 6                      # Encoder speed for heif savers (1-10)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Log a warning for every image or blob handle still alive at shutdown.
    pub report_leaks: bool,
    /// Keep per-operation call and failure counters.
    pub collect_stats: bool,
    /// Interpolator used by operations that resample when the caller gives none.
    pub default_interpolator: String,
    /// Defaults applied by the savers when the caller does not set them.
    pub save: SaveConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            report_leaks: false,
            collect_stats: true,
            default_interpolator: "bilinear".to_string(),
            save: SaveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SaveConfig {
    pub jpeg_quality: u32,
    pub png_compression: u32,
    pub heif_speed: u32,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 75,
            png_compression: 6,
            heif_speed: 6,
        }
    }
}

impl RuntimeConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config values are within acceptable ranges.
    ///
    /// The interpolator name is checked against the registry at startup, not
    /// here, since only the registry knows which names exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.save.jpeg_quality) {
            return Err(ConfigError::Validation(
                "save.jpeg_quality must be 1-100".into(),
            ));
        }
        if self.save.png_compression > 9 {
            return Err(ConfigError::Validation(
                "save.png_compression must be 0-9".into(),
            ));
        }
        if !(1..=10).contains(&self.save.heif_speed) {
            return Err(ConfigError::Validation(
                "save.heif_speed must be 1-10".into(),
            ));
        }
        if self.default_interpolator.trim().is_empty() {
            return Err(ConfigError::Validation(
                "default_interpolator must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// A documented config file with every option at its default.
pub fn stock_config_toml() -> &'static str {
    r#"# imgcall runtime configuration
# All options are optional - defaults shown below

# Log a warning for every image or blob handle still alive at shutdown.
report_leaks = false

# Count calls and failures per operation.
collect_stats = true

# Interpolator used by affine when no interpolate argument is given.
# One of: nearest, bilinear, bicubic, gaussian, lanczos3
default_interpolator = "bilinear"

[save]
# Default Q for jpeg and heif savers (1-100).
jpeg_quality = 75
# Default compression for png savers (0-9).
png_compression = 6
# Encoder speed for heif savers (1 = slowest, 10 = fastest).
heif_speed = 6
"#
}
