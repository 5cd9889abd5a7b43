//! # Live Voice Session
//!
//! Real-time duplex voice sessions against a remote conversational model:
//! microphone audio is streamed out while model audio streams back in and is
//! played gaplessly, with mid-stream interruption, muting and deterministic
//! teardown.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                       SessionController (session)                        │
//! │        state machine · mute gate · interruption · teardown               │
//! │                                                                          │
//! │   OUTBOUND                                                               │
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────────────────────┐    │
//! │  │CaptureSource │──▶│ FrameEncoder │──▶│ outbound gate + deferred   │──┐ │
//! │  │ (16 kHz mono)│   │ f32 → i16 →  │   │ queue (flushed on open)    │  │ │
//! │  └──────────────┘   │   base64     │   └────────────────────────────┘  │ │
//! │                     └──────────────┘                                   │ │
//! │                                                                        ▼ │
//! │                                            ┌────────────────────────────┐│
//! │                                            │ SessionTransport           ││
//! │                                            │ open · send · close        ││
//! │                                            │ on_open/message/error/close││
//! │                                            └─────────────┬──────────────┘│
//! │   INBOUND                                                │               │
//! │  ┌──────────────┐   ┌───────────────────┐   ┌────────────▼─────────┐     │
//! │  │ AudioOutput  │◀──│ PlaybackScheduler │◀──│    FrameDecoder      │     │
//! │  │ clock · play │   │ next_start cursor │   │ base64 → i16 → f32   │     │
//! │  │ stop_all     │   │ active unit set   │   │   (24 kHz mono)      │     │
//! │  └──────────────┘   └───────────────────┘   └──────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use session::{SessionController, SessionState};

/// Application-wide constants
pub mod constants {
    /// Capture (outbound) sample rate
    pub const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;

    /// Model audio (inbound) sample rate
    pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

    /// Both directions are mono
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Samples per captured frame
    pub const DEFAULT_CAPTURE_FRAME_SAMPLES: usize = 4096;

    /// Encoding tag for raw little-endian 16-bit PCM
    pub const PCM_MIME_TYPE: &str = "audio/pcm";

    /// Bytes per encoded sample
    pub const SAMPLE_WIDTH: usize = 2;

    /// Config file name looked up in the platform config directory
    pub const CONFIG_FILE_NAME: &str = "live-session.toml";
}
