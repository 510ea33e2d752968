//! Editor configuration
//!
//! Loaded from an optional JSON file. Every field has a built-in default, so
//! an empty object (or no file at all) is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dsp::EffectParameters;
use crate::error::{EditorError, Result};

/// Which output device the audio context opens
///
/// `System` falls back to `Headless` when no system device can be opened.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    /// Timer-driven output that discards audio
    Headless,
    /// Default system output device (needs the `device-output` feature)
    #[default]
    System,
}

/// Output context configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub backend: OutputBackend,
    /// Sample rate of the headless device (system devices report their own)
    pub sample_rate: u32,
    pub channels: usize,
    /// Frames pulled per headless tick
    pub block_frames: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backend: OutputBackend::System,
            sample_rate: 48000,
            channels: 2,
            block_frames: 512,
        }
    }
}

/// Playback controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Position tracker period (one display refresh at 60 Hz)
    pub refresh_interval_ms: u64,
    /// Rate used until the user picks another
    pub default_rate: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 16,
            default_rate: 1.0,
        }
    }
}

/// Offline renderer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Frames per block pushed through the effect chain
    pub block_size: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { block_size: 512 }
    }
}

/// External transcoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// ffmpeg executable
    pub program: PathBuf,
    /// Encoder ffmpeg must provide
    pub encoder: String,
    /// Extension of the compressed output
    pub extension: String,
    /// Extra arguments placed before the output file name
    pub extra_args: Vec<String>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            encoder: "libmp3lame".to_string(),
            extension: "mp3".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub output: OutputConfig,
    pub playback: PlaybackConfig,
    pub render: RenderConfig,
    pub transcoder: TranscoderConfig,
    /// Directory exported files are written to
    pub export_dir: PathBuf,
    /// Initial effect settings
    pub effects: EffectParameters,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            playback: PlaybackConfig::default(),
            render: RenderConfig::default(),
            transcoder: TranscoderConfig::default(),
            export_dir: PathBuf::from("."),
            effects: EffectParameters::default(),
        }
    }
}

impl EditorConfig {
    /// Load from a JSON file, or the defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let config: EditorConfig = serde_json::from_str(&text)?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings nothing downstream can work with
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(EditorError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.output.sample_rate == 0 {
            return invalid("output.sample_rate must be positive");
        }
        if self.output.channels == 0 {
            return invalid("output.channels must be positive");
        }
        if self.output.block_frames == 0 {
            return invalid("output.block_frames must be positive");
        }
        if self.playback.refresh_interval_ms == 0 {
            return invalid("playback.refresh_interval_ms must be positive");
        }
        if self.render.block_size == 0 {
            return invalid("render.block_size must be positive");
        }
        if self.transcoder.extension.is_empty() {
            return invalid("transcoder.extension must not be empty");
        }
        if self.transcoder.program.as_os_str().is_empty() {
            return invalid("transcoder.program must not be empty");
        }
        Ok(())
    }
}
