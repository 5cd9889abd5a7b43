//! PCM frame decoder
//!
//! Inverse of the encoder for model audio: base64 text → little-endian 16-bit
//! PCM at the configured output rate. Anything that does not fit that contract
//! is a [`CodecError::MalformedFrame`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::audio::frame::{AudioFrame, Direction};
use crate::constants::SAMPLE_WIDTH;
use crate::error::CodecError;
use crate::protocol::{MediaChunk, MimeTag};

/// Stateless decoder for one output rate
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    sample_rate: u32,
}

impl FrameDecoder {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Decode a media chunk into an output frame
    pub fn decode(&self, chunk: &MediaChunk) -> Result<AudioFrame, CodecError> {
        let tag = MimeTag::parse(&chunk.mime_type).map_err(CodecError::MalformedFrame)?;
        if !tag.is_pcm() {
            return Err(CodecError::MalformedFrame(format!(
                "unrecognized encoding tag '{}'",
                chunk.mime_type
            )));
        }
        if let Some(rate) = tag.rate {
            if rate != self.sample_rate {
                return Err(CodecError::MalformedFrame(format!(
                    "frame declares {} Hz, output runs at {} Hz",
                    rate, self.sample_rate
                )));
            }
        }

        let bytes = STANDARD
            .decode(&chunk.data)
            .map_err(|e| CodecError::MalformedFrame(format!("invalid base64: {}", e)))?;

        if bytes.is_empty() {
            return Err(CodecError::MalformedFrame("empty payload".into()));
        }
        if bytes.len() % SAMPLE_WIDTH != 0 {
            return Err(CodecError::MalformedFrame(format!(
                "payload length {} is not a multiple of {}",
                bytes.len(),
                SAMPLE_WIDTH
            )));
        }

        let samples: Vec<i16> = bytes
            .chunks_exact(SAMPLE_WIDTH)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        Ok(AudioFrame::new(samples, self.sample_rate, Direction::Output))
    }

    /// Decode straight to playable float samples
    pub fn decode_f32(&self, chunk: &MediaChunk) -> Result<Vec<f32>, CodecError> {
        self.decode(chunk).map(|frame| frame.to_f32())
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
