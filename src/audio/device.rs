//! Audio device lookup

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{FromSample, Sample, SizedSample};
use serde::Serialize;

use crate::error::AudioError;

/// Summary of a host audio device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
    pub default_sample_rate: Option<u32>,
    pub default_channels: Option<u16>,
}

/// List all available audio devices
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices: Vec<DeviceInfo> = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            let Ok(name) = device.name() else { continue };
            let config = device.default_input_config().ok();
            devices.push(DeviceInfo {
                is_default: default_input_name.as_ref() == Some(&name),
                name,
                is_input: true,
                is_output: false,
                default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                default_channels: config.as_ref().map(|c| c.channels()),
            });
        }
    }

    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let Ok(name) = device.name() else { continue };
            let is_default = default_output_name.as_ref() == Some(&name);

            // Duplex devices show up in both lists
            if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                existing.is_output = true;
                existing.is_default |= is_default;
                continue;
            }

            let config = device.default_output_config().ok();
            devices.push(DeviceInfo {
                name,
                is_input: false,
                is_output: true,
                is_default,
                default_sample_rate: config.as_ref().map(|c| c.sample_rate().0),
                default_channels: config.as_ref().map(|c| c.channels()),
            });
        }
    }

    devices
}

/// Input device by name, or the host default when `name` is `None`
pub fn find_input_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::NoDevice("no default input device".into())),
        Some(name) => {
            let devices = host
                .input_devices()
                .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;
            find_named(devices, name)
        }
    }
}

/// Output device by name, or the host default when `name` is `None`
pub fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::NoDevice("no default output device".into())),
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;
            find_named(devices, name)
        }
    }
}

fn find_named(
    devices: impl Iterator<Item = cpal::Device>,
    name: &str,
) -> Result<cpal::Device, AudioError> {
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::NoDevice(name.to_string()))
}

/// Convert a device buffer of any supported sample format to f32
pub fn samples_to_f32<T>(input: &[T], out: &mut Vec<f32>)
where
    T: SizedSample,
    f32: FromSample<T>,
{
    out.clear();
    out.extend(input.iter().map(|&sample| f32::from_sample(sample)));
}

/// Write f32 samples into a device buffer of another sample format
pub fn f32_to_samples<T>(input: &[f32], out: &mut [T])
where
    T: SizedSample + FromSample<f32>,
{
    for (dst, &src) in out.iter_mut().zip(input) {
        *dst = T::from_sample(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_to_f32() {
        let mut out = Vec::new();
        samples_to_f32(&[0i16, i16::MIN, 16_384], &mut out);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], -1.0);
        assert!((out[2] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_u16_is_offset_binary() {
        let mut out = vec![9.0];
        samples_to_f32(&[32_768u16, 0], &mut out);
        assert_eq!(out, vec![0.0, -1.0]);
    }

    #[test]
    fn test_f32_to_integer_formats() {
        let mut signed = [1i16; 2];
        f32_to_samples(&[0.0, -1.0], &mut signed);
        assert_eq!(signed, [0, i16::MIN]);

        let mut unsigned = [1u16; 2];
        f32_to_samples(&[0.0, -1.0], &mut unsigned);
        assert_eq!(unsigned, [32_768, 0]);
    }
}
