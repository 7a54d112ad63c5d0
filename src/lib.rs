pub mod arena;
pub mod capture;
pub mod convert;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod render;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::capture::SourceFormat;
use crate::render::RenderMode;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub pipeline: PipelineConfig,
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device path, e.g. "/dev/video0". Empty string means auto-detect,
    /// falling back to the synthetic test-pattern source.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: SourceFormat,
    /// Number of plane buffers kept in the capture pool.
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub fullscreen: bool,
    pub initial_mode: RenderMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Depth of the capture -> processing channel. Small on purpose: the
    /// processing loop drains to the newest frame before working.
    pub channel_depth: usize,
    pub pin_processing_thread: bool,
    /// Statistics sampling window in milliseconds.
    pub stats_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Whether edge detection starts enabled.
    pub enabled: bool,
    pub low_threshold: f32,
    pub high_threshold: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
            format: SourceFormat::Yuyv,
            buffer_count: 4,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            vsync: true,
            fullscreen: false,
            initial_mode: RenderMode::Normal,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_depth: 2,
            pin_processing_thread: false,
            stats_window_ms: 1000,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_threshold: 50.0,
            high_threshold: 150.0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, layered over defaults.
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }

    /// Load from `path` if it exists; otherwise fall back to defaults.
    /// A malformed file is reported and ignored rather than aborting startup.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}
