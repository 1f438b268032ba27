//! Runtime configuration, loadable from TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use nebula_gpu::GpuConfig;
use nebula_raytrace::DeviceConfig;

/// Errors returned while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid configuration TOML.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings for the accelerator and the GPU context.
///
/// ```toml
/// [accel]
/// max_leaf_size = 4
/// sah_buckets = 12
/// scene_flags = { dynamic = true, robust = true }
///
/// [gpu]
/// power_preference = "high-performance"
/// backends = "primary"
/// force_fallback_adapter = false
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NebulaConfig {
    /// Accelerator device settings, applied to every new scene.
    pub accel: DeviceConfig,
    /// GPU adapter selection.
    pub gpu: GpuConfig,
}

impl NebulaConfig {
    /// Parse configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
