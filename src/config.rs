// src/config.rs

//! Defines the configuration structures for the player.
//!
//! This module provides a set of structs that can be deserialized from a
//! JSON configuration file to customize the media source, overlay, timing
//! behavior, render path and screenshot capture.
//!
//! Default values are provided for every option, so an empty configuration
//! (or no configuration at all) yields a runnable player.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use log::{info, warn};

/// Environment variable naming the JSON configuration file.
const CONFIG_ENV_VAR: &str = "KMS_PLAYER_CONFIG";

// --- Top-Level Configuration Structure ---

/// Represents the complete configuration for the player.
///
/// This struct is the root of the configuration and is intended to be
/// deserialized from a configuration file. It groups settings into logical
/// categories: media, overlay, timing, render and capture.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)] // Apply default values for the entire struct if a field is missing.
pub struct Config {
    /// Media source settings.
    pub media: MediaConfig,
    /// Scrolling text overlay settings.
    pub overlay: OverlayConfig,
    /// Timing and backoff settings for the playback loop.
    pub timing: TimingConfig,
    /// Render pipeline settings.
    pub render: RenderConfig,
    /// Screenshot capture settings.
    pub capture: CaptureConfig,
}

impl Config {
    /// Loads the configuration from the file named by `KMS_PLAYER_CONFIG`,
    /// falling back to defaults when the variable is unset. A file that
    /// exists but fails to parse is an error; a missing variable is not.
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => {
                info!("Loading configuration from '{}'", path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("failed to read config '{}': {}", path, e))?;
                let config: Config = serde_json::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("failed to parse config '{}': {}", path, e))?;
                Ok(config)
            }
            Err(_) => {
                warn!("{} not set, using default configuration", CONFIG_ENV_VAR);
                Ok(Config::default())
            }
        }
    }
}

// --- Media Configuration ---

/// Defines the media source for playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to the MP4 file to decode and loop.
    pub path: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        MediaConfig {
            path: PathBuf::from("sample.mp4"),
        }
    }
}

// --- Overlay Configuration ---

/// Defines the scrolling text overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Whether the overlay is drawn at all.
    pub enabled: bool,
    /// Path to a TrueType font file.
    pub font_path: PathBuf,
    /// The text scrolled across the bottom of the screen.
    pub text: String,
    /// Glyph rasterization size in pixels.
    pub pixel_size: u32,
    /// Horizontal scroll speed in pixels per second.
    pub scroll_speed: f32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            enabled: true,
            font_path: PathBuf::from(
                "/usr/share/fonts/truetype/vlgothic/VL-Gothic-Regular.ttf",
            ),
            text: "Hello, kms-player!".to_string(),
            pixel_size: 64,
            scroll_speed: 100.0,
        }
    }
}

// --- Timing Configuration ---

/// Bounded-wait and backoff constants for the playback loop.
///
/// These were scattered literals in earlier iterations; they are centralized
/// here so the loop has a single source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Upper bound on a single frame acquire, in milliseconds.
    pub acquire_timeout_ms: u64,
    /// Sleep between iterations when the source produced nothing.
    pub empty_backoff_ms: u64,
    /// Wall-clock budget for the first frame to arrive.
    pub startup_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            acquire_timeout_ms: 10,
            empty_backoff_ms: 1,
            startup_timeout_ms: 3000,
        }
    }
}

// --- Render Configuration ---

/// Which render path the pipeline uses. Fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenderPathConfig {
    /// Draw the video straight onto the window surface.
    #[default]
    Direct,
    /// Compose into an offscreen FBO first, then blit to the surface.
    Offscreen,
}

/// Defines the render pipeline behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RenderConfig {
    /// Selected render path.
    pub path: RenderPathConfig,
}

// --- Capture Configuration ---

/// Defines screenshot capture behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory screenshots are written into.
    pub directory: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            directory: PathBuf::from("."),
        }
    }
}
