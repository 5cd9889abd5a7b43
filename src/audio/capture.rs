//! Microphone capture
//!
//! A [`CaptureSource`] pushes fixed-size mono frames into a registered
//! [`CaptureSink`]. [`CpalCapture`] is the device-backed implementation: the
//! cpal stream lives on its own thread since streams are not `Send`.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{find_input_device, samples_to_f32};
use crate::error::AudioError;

/// Receiver for captured audio.
///
/// Called from the capture thread; implementations must not block for long.
pub trait CaptureSink: Send + Sync {
    /// A full frame of mono samples in [-1.0, 1.0] at the source's rate
    fn on_frame(&self, samples: &[f32]);

    /// The device went away while open
    fn on_device_lost(&self, error: AudioError);
}

/// Push-based audio source
pub trait CaptureSource: Send + Sync {
    /// Acquire the device and start delivering frames to `sink`
    fn open(&self, sink: Arc<dyn CaptureSink>) -> Result<(), AudioError>;

    /// Stop delivering and release the device. Idempotent.
    fn close(&self);

    /// Rate of the frames handed to the sink
    fn sample_rate(&self) -> u32;
}

/// Linear-interpolating rate converter for a mono stream
#[derive(Debug, Clone)]
pub struct LinearResampler {
    /// Input samples consumed per output sample
    step: f64,
    /// Read position, relative to `last`
    position: f64,
    last: f32,
    scratch: Vec<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            step: from_rate as f64 / to_rate as f64,
            position: 1.0,
            last: 0.0,
            scratch: Vec::new(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        (self.step - 1.0).abs() < f64::EPSILON
    }

    /// Convert `input`, appending to `output`
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }
        if self.is_passthrough() {
            output.extend_from_slice(input);
            return;
        }

        self.scratch.clear();
        self.scratch.push(self.last);
        self.scratch.extend_from_slice(input);
        let buf = &self.scratch;

        loop {
            let index = self.position.floor() as usize;
            if index + 1 >= buf.len() {
                break;
            }
            let frac = (self.position - index as f64) as f32;
            output.push(buf[index] * (1.0 - frac) + buf[index + 1] * frac);
            self.position += self.step;
        }

        self.position -= (buf.len() - 1) as f64;
        self.last = buf[buf.len() - 1];
    }
}

/// Turns arbitrary device callbacks into fixed-size mono frames
pub struct Framer {
    device_channels: usize,
    frame_samples: usize,
    resampler: LinearResampler,
    mono: Vec<f32>,
    pending: Vec<f32>,
}

impl Framer {
    pub fn new(device_rate: u32, target_rate: u32, device_channels: u16, frame_samples: usize) -> Self {
        Self {
            device_channels: device_channels.max(1) as usize,
            frame_samples,
            resampler: LinearResampler::new(device_rate, target_rate),
            mono: Vec::new(),
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Feed interleaved device samples; `emit` is called once per full frame
    pub fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(&[f32])) {
        // Channel 0 only
        self.mono.clear();
        self.mono
            .extend(interleaved.iter().step_by(self.device_channels).copied());

        self.resampler.process(&self.mono, &mut self.pending);

        while self.pending.len() >= self.frame_samples {
            emit(&self.pending[..self.frame_samples]);
            self.pending.drain(..self.frame_samples);
        }
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Capture from a cpal input device
pub struct CpalCapture {
    /// Used for the thread name
    label: String,

    /// `None` selects the host default
    device_name: Option<String>,

    sample_rate: u32,
    frame_samples: usize,

    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    frames_captured: Arc<AtomicU64>,
}

impl CpalCapture {
    pub fn new(
        label: impl Into<String>,
        device_name: Option<String>,
        sample_rate: u32,
        frame_samples: usize,
    ) -> Self {
        Self {
            label: label.into(),
            device_name,
            sample_rate,
            frame_samples,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            frames_captured: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }
}

impl CaptureSource for CpalCapture {
    fn open(&self, sink: Arc<dyn CaptureSink>) -> Result<(), AudioError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let frames_captured = self.frames_captured.clone();
        let device_name = self.device_name.clone();
        let target_rate = self.sample_rate;
        let frame_samples = self.frame_samples;
        self.frames_captured.store(0, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.label))
            .spawn(move || {
                let device = match find_input_device(device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let supported = match device.default_input_config() {
                    Ok(config) => config,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::NoDevice(e.to_string())));
                        return;
                    }
                };
                let sample_format = supported.sample_format();
                let config: StreamConfig = supported.config();
                let device_rate = config.sample_rate.0;

                tracing::debug!(
                    "Capture device: {} Hz, {} channels, {:?} -> {} Hz mono",
                    device_rate,
                    config.channels,
                    sample_format,
                    target_rate
                );

                let mut framer = Framer::new(device_rate, target_rate, config.channels, frame_samples);
                let frame_sink = sink.clone();
                let error_sink = sink;

                let on_data = move |data: &[f32]| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    framer.push(data, |frame| {
                        frames_captured.fetch_add(1, Ordering::Relaxed);
                        frame_sink.on_frame(frame);
                    });
                };
                let on_error = move |err: cpal::StreamError| match err {
                    cpal::StreamError::DeviceNotAvailable => {
                        error_sink.on_device_lost(AudioError::DeviceLost(err.to_string()));
                    }
                    other => tracing::warn!("Capture stream error: {}", other),
                };

                let stream = match sample_format {
                    SampleFormat::F32 => build_input::<f32>(&device, &config, on_data, on_error),
                    SampleFormat::I16 => build_input::<i16>(&device, &config, on_data, on_error),
                    SampleFormat::U16 => build_input::<u16>(&device, &config, on_data, on_error),
                    other => {
                        let _ = ready_tx.send(Err(AudioError::UnsupportedFormat(format!(
                            "capture sample format {:?}",
                            other
                        ))));
                        return;
                    }
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(map_build_error(e)));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::park_timeout(Duration::from_millis(10));
                }

                // Stream is dropped here, releasing the device
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.worker.lock() = Some(handle);
                tracing::info!("Capture opened ({} Hz, {} samples/frame)", self.sample_rate, self.frame_samples);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(AudioError::StreamError("capture thread exited early".into()))
            }
        }
    }

    fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Not joined: close may run on the device callback thread, and the
        // worker drops the stream within one park interval.
        if let Some(handle) = self.worker.lock().take() {
            handle.thread().unpark();
        }
        tracing::info!("Capture closed after {} frames", self.frames_captured());
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Input stream in the device's native sample format, delivering f32
fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut on_data: impl FnMut(&[f32]) + Send + 'static,
    on_error: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut converted: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            samples_to_f32(data, &mut converted);
            on_data(&converted);
        },
        on_error,
        None,
    )
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::NoDevice(err.to_string()),
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => AudioError::UnsupportedFormat(err.to_string()),
        other => AudioError::StreamError(other.to_string()),
    }
}
