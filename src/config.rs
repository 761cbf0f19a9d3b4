//! Configuration management.
//!
//! Covers camera defaults, storage destinations, and scheduler deadlines,
//! with TOML load/save for embedding applications.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Facing;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewfinderConfig {
    pub camera: CameraConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

/// Camera-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Preview resolution [width, height]
    pub preview_resolution: [u32; 2],
    /// Still-capture resolution [width, height]
    pub capture_resolution: [u32; 2],
    /// Which camera to open first
    pub default_facing: Facing,
    /// Whether still captures are supported at all; when false the session
    /// configures no still sink and capture requests are ignored
    pub still_capture: bool,
    /// Fire an autofocus trigger with each still capture
    pub trigger_autofocus: bool,
    /// Abort in-flight captures before submitting a still, for a clean slate
    pub abort_inflight_on_still: bool,
    /// Still-image pool size shared between device and persistence
    pub image_queue_capacity: usize,
}

/// Storage and file naming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Destination directory for captures
    pub output_directory: String,
    /// Filename prefix for captures
    pub filename_prefix: String,
}

/// Worker context deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long a retiring context may take to drain before being abandoned
    pub shutdown_timeout_ms: u64,
    /// How long state observers wait for teardown to settle
    pub settle_timeout_ms: u64,
}

impl Default for ViewfinderConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                preview_resolution: [1280, 720],
                capture_resolution: [1280, 720],
                default_facing: Facing::Back,
                still_capture: true,
                trigger_autofocus: true,
                abort_inflight_on_still: true,
                image_queue_capacity: 2,
            },
            storage: StorageConfig {
                output_directory: "./captures".to_string(),
                filename_prefix: "still".to_string(),
            },
            scheduler: SchedulerConfig {
                shutdown_timeout_ms: 2000,
                settle_timeout_ms: 2000,
            },
        }
    }
}

impl ViewfinderConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}
