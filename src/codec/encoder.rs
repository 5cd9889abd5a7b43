//! PCM frame encoder
//!
//! Float capture samples become little-endian 16-bit PCM, packaged as base64
//! text for the transport.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::constants::SAMPLE_WIDTH;
use crate::protocol::{pcm_mime_type, WireMessage};

/// Saturating float → fixed-point conversion.
///
/// Out-of-range input clips to the i16 limits instead of wrapping; NaN maps
/// to silence.
pub fn quantize(sample: f32) -> i16 {
    (sample * 32768.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Stateless encoder for one capture rate. `Sync`, so a single instance can be
/// shared by concurrent callers.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    sample_rate: u32,
    mime_type: String,
}

impl FrameEncoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            mime_type: pcm_mime_type(sample_rate),
        }
    }

    /// Encode a raw capture buffer straight to a media message
    pub fn encode(&self, samples: &[f32]) -> WireMessage {
        let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
        for &sample in samples {
            bytes.extend_from_slice(&quantize(sample).to_le_bytes());
        }
        WireMessage::media(STANDARD.encode(bytes), self.mime_type.clone())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
