//! Error types for the voice session

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Session-level failures surfaced through the control surface.
///
/// `DeviceUnavailable`, `TransportOpenFailed` and `TransportError` are
/// terminal and become the session's `last_error`. `InvalidTransition` is only
/// ever returned for operations on a closed session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Transport failed to open: {0}")]
    TransportOpenFailed(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Invalid transition: {event} while {from:?}")]
    InvalidTransition {
        from: SessionState,
        event: &'static str,
    },
}

/// Audio device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("No device: {0}")]
    NoDevice(String),

    #[error("Device lost: {0}")]
    DeviceLost(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::DeviceUnavailable(err.to_string())
    }
}

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Open failed: {0}")]
    OpenFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Transport closed")]
    Closed,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No config directory available")]
    NoConfigDir,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
