//! Configuration system
//!
//! Subsystem configs are plain serde structs. [`RenderCoreConfig`] bundles
//! them and can be stored as TOML or RON, picked by file extension.

use crate::batching::BatchConfig;
use crate::culling::CullingConfig;
use crate::queue::RenderQueueConfig;
pub use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialized configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.toml`
    Toml,
    /// `.ron`
    Ron,
}

impl ConfigFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("ron") => Ok(Self::Ron),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Check the values after loading
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Parse and validate configuration text
    fn from_str_with(contents: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?,
            ConfigFormat::Ron => ron::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?,
        };
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Serialize configuration text
    fn to_string_with(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string())),
            ConfigFormat::Ron => ron::ser::to_string_pretty(self, Default::default())
                .map_err(|e| ConfigError::Serialize(e.to_string())),
        }
    }

    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_str_with(&contents, format)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = self.to_string_with(ConfigFormat::from_path(path)?)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Values failed validation
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// # Render Core Configuration
///
/// Settings for every per-frame subsystem, usually loaded once at startup
/// and handed to [`FrameRenderer::new`](crate::renderer::FrameRenderer::new).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderCoreConfig {
    /// Visibility culling
    pub culling: CullingConfig,
    /// Draw call batching
    pub batching: BatchConfig,
    /// Render queue sorting
    pub queue: RenderQueueConfig,
}

impl RenderCoreConfig {
    /// Builder: replace the culling settings
    #[must_use]
    pub fn with_culling(mut self, culling: CullingConfig) -> Self {
        self.culling = culling;
        self
    }

    /// Builder: replace the batching settings
    #[must_use]
    pub fn with_batching(mut self, batching: BatchConfig) -> Self {
        self.batching = batching;
        self
    }

    /// Builder: replace the queue settings
    #[must_use]
    pub fn with_queue(mut self, queue: RenderQueueConfig) -> Self {
        self.queue = queue;
        self
    }
}

impl Config for RenderCoreConfig {
    fn validate(&self) -> Result<(), String> {
        self.culling.validate()?;
        self.batching.validate()?;
        self.queue.validate()?;
        Ok(())
    }
}
