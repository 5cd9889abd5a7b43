//! Audio subsystem module

pub mod capture;
pub mod device;
pub mod frame;
pub mod output;

pub use capture::{CaptureSink, CaptureSource, CpalCapture};
pub use device::{list_devices, DeviceInfo};
pub use frame::{AudioFrame, Direction};
pub use output::{AudioOutput, CpalOutput, OnEnded, PlaybackUnit, UnitId};
