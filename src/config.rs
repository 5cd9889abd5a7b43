//! Configuration for the voice session
//!
//! Loaded from TOML. A missing file falls back to [`AppConfig::default`].

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Audio format and device selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture (outbound) sample rate in Hz
    pub input_sample_rate: u32,

    /// Model audio (inbound) sample rate in Hz
    pub output_sample_rate: u32,

    /// Channel count for both directions; only mono is supported
    pub channels: u16,

    /// Samples per captured frame
    pub capture_frame_samples: usize,

    /// Input device name, `None` for the host default
    pub input_device: Option<String>,

    /// Output device name, `None` for the host default
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: DEFAULT_INPUT_SAMPLE_RATE,
            output_sample_rate: DEFAULT_OUTPUT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            capture_frame_samples: DEFAULT_CAPTURE_FRAME_SAMPLES,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Duration of one captured frame in milliseconds
    pub fn capture_frame_ms(&self) -> f32 {
        self.capture_frame_samples as f32 * 1000.0 / self.input_sample_rate as f32
    }
}

/// Session behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Opaque setup payload sent as the first message once the transport opens
    pub setup: Option<serde_json::Value>,

    /// Delay applied by the loopback transport before echoing media back
    pub loopback_delay_ms: u64,
}

impl AppConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => {
                tracing::info!("Loaded config from {}", path.display());
                Self::from_toml_str(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Invalid(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Load from the platform config directory
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Platform config file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("dev", "live-voice", "live-session")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;
        if audio.input_sample_rate == 0 || audio.output_sample_rate == 0 {
            return Err(ConfigError::Invalid("sample rates must be non-zero".into()));
        }
        if audio.channels != 1 {
            return Err(ConfigError::Invalid(format!(
                "only mono audio is supported, got {} channels",
                audio.channels
            )));
        }
        if audio.capture_frame_samples == 0 {
            return Err(ConfigError::Invalid(
                "capture_frame_samples must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
