//! PCM wire codec
//!
//! Fixed-point 16-bit little-endian PCM, base64-packaged. Encoding is for the
//! capture direction, decoding for model audio; each side is pinned to one
//! sample rate.

pub mod decoder;
pub mod encoder;

pub use decoder::FrameDecoder;
pub use encoder::{quantize, FrameEncoder};
