//! Audio output boundary
//!
//! The scheduler only needs three things from the host: a clock, a way to
//! start a buffer at an absolute clock time, and a way to silence everything.
//! [`CpalOutput`] provides them on top of a cpal output stream by mixing
//! scheduled units against a clock derived from rendered device frames.
//! Completion callbacks run on the playback worker thread, never inside the
//! render callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam::queue::SegQueue;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::{f32_to_samples, find_output_device};
use crate::audio::frame::{samples_to_duration, AudioFrame};
use crate::error::AudioError;

/// Identifies one scheduled unit for the lifetime of its scheduler
pub type UnitId = u64;

/// Completion notification, invoked once when a unit finishes naturally
pub type OnEnded = Box<dyn FnOnce(UnitId) + Send>;

/// A decoded frame bound to its start time on the output clock
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    pub id: UnitId,
    pub start: Duration,
    pub frame: AudioFrame,
}

impl PlaybackUnit {
    pub fn duration(&self) -> Duration {
        self.frame.duration()
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration()
    }
}

/// Host playback surface.
///
/// `on_ended` must be delivered asynchronously, never from inside
/// `schedule_buffer`. Units cut short by `stop_all` do not report completion.
pub trait AudioOutput: Send + Sync {
    /// Current position of the output clock
    fn current_clock(&self) -> Duration;

    /// Play `unit` starting at `unit.start` on the output clock
    fn schedule_buffer(&self, unit: PlaybackUnit, on_ended: OnEnded) -> Result<(), AudioError>;

    /// Silence every scheduled or playing unit
    fn stop_all(&self);

    /// Release the device
    fn close(&self) {}
}

struct Voice {
    id: UnitId,
    generation: u64,
    start_secs: f64,
    sample_rate: u32,
    samples: Vec<f32>,
    on_ended: Option<OnEnded>,
}

impl Voice {
    /// Start and end positions in device frames
    fn span_frames(&self, device_rate: f64) -> (f64, f64) {
        let start = self.start_secs * device_rate;
        let length = self.samples.len() as f64 * device_rate / self.sample_rate as f64;
        (start, start + length)
    }

    /// Interpolated sample at device frame `frame`, `None` outside the unit
    fn sample_at(&self, frame: f64, start_frame: f64, step: f64) -> Option<f32> {
        let pos = (frame - start_frame) * step;
        if pos < 0.0 {
            return None;
        }
        let index = pos.floor() as usize;
        let current = *self.samples.get(index)?;
        let next = self.samples.get(index + 1).copied().unwrap_or(0.0);
        let frac = (pos - index as f64) as f32;
        Some(current * (1.0 - frac) + next * frac)
    }
}

/// A voice leaving the mixer, released on the worker thread
struct Retired {
    voice: Voice,
    /// Played to the end, as opposed to cut off by `stop_all`
    finished: bool,
}

struct OutputShared {
    device_rate: AtomicU32,
    frames_rendered: AtomicU64,
    generation: AtomicU64,
    incoming: SegQueue<Voice>,
    retired: SegQueue<Retired>,
}

impl OutputShared {
    fn clock(&self) -> Duration {
        samples_to_duration(
            self.frames_rendered.load(Ordering::Acquire),
            self.device_rate.load(Ordering::Acquire),
        )
    }

    /// Drop retired voices, reporting the ones that finished. Returns how
    /// many completions were delivered.
    fn drain_retired(&self) -> usize {
        let mut completed = 0;
        while let Some(Retired { mut voice, finished }) = self.retired.pop() {
            if !finished {
                continue;
            }
            if let Some(on_ended) = voice.on_ended.take() {
                on_ended(voice.id);
                completed += 1;
            }
        }
        completed
    }
}

/// Mixes units onto a device channel layout; owned by the render callback
struct Mixer {
    shared: Arc<OutputShared>,
    channels: usize,
    voices: Vec<Voice>,
}

impl Mixer {
    fn retire(&self, voice: Voice, finished: bool) {
        self.shared.retired.push(Retired { voice, finished });
    }

    fn render(&mut self, data: &mut [f32]) {
        let generation = self.shared.generation.load(Ordering::Acquire);
        while let Some(voice) = self.shared.incoming.pop() {
            if voice.generation == generation {
                self.voices.push(voice);
            } else {
                self.retire(voice, false);
            }
        }
        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].generation == generation {
                i += 1;
            } else {
                let stopped = self.voices.swap_remove(i);
                self.retire(stopped, false);
            }
        }

        data.fill(0.0);
        let rate = self.shared.device_rate.load(Ordering::Relaxed) as f64;
        let base = self.shared.frames_rendered.load(Ordering::Relaxed);
        let frames = data.len() / self.channels;
        let block_end = (base + frames as u64) as f64;

        let mut i = 0;
        while i < self.voices.len() {
            let voice = &self.voices[i];
            let (start_frame, end_frame) = voice.span_frames(rate);
            let step = voice.sample_rate as f64 / rate;
            for n in 0..frames {
                let frame = (base + n as u64) as f64;
                if let Some(sample) = voice.sample_at(frame, start_frame, step) {
                    let offset = n * self.channels;
                    for out in &mut data[offset..offset + self.channels] {
                        *out += sample;
                    }
                }
            }
            if end_frame <= block_end {
                let done = self.voices.swap_remove(i);
                self.retire(done, true);
            } else {
                i += 1;
            }
        }

        for out in data.iter_mut() {
            *out = out.clamp(-1.0, 1.0);
        }

        self.shared
            .frames_rendered
            .fetch_add(frames as u64, Ordering::AcqRel);
    }
}

/// Output stream in the device's native sample format, mixed in f32
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut mixed: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            mixed.resize(data.len(), 0.0);
            mixer.render(&mut mixed);
            f32_to_samples(&mixed, data);
        },
        |err| tracing::warn!("Playback stream error: {}", err),
        None,
    )
}

/// Playback through a cpal output device
pub struct CpalOutput {
    shared: Arc<OutputShared>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Open the named output device (or the host default) and start the clock
    pub fn open(label: &str, device_name: Option<String>) -> Result<Self, AudioError> {
        let shared = Arc::new(OutputShared {
            device_rate: AtomicU32::new(0),
            frames_rendered: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            incoming: SegQueue::new(),
            retired: SegQueue::new(),
        });
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let shared_for_thread = shared.clone();
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name(format!("playback-{}", label))
            .spawn(move || {
                let device = match find_output_device(device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let supported = match device.default_output_config() {
                    Ok(supported) => supported,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::NoDevice(e.to_string())));
                        return;
                    }
                };
                let sample_format = supported.sample_format();
                let config: StreamConfig = supported.config();
                shared_for_thread
                    .device_rate
                    .store(config.sample_rate.0, Ordering::Release);

                tracing::debug!(
                    "Playback device: {} Hz, {} channels, {:?}",
                    config.sample_rate.0,
                    config.channels,
                    sample_format
                );

                let mixer = Mixer {
                    shared: shared_for_thread.clone(),
                    channels: config.channels.max(1) as usize,
                    voices: Vec::new(),
                };

                let stream = match sample_format {
                    SampleFormat::F32 => build_output::<f32>(&device, &config, mixer),
                    SampleFormat::I16 => build_output::<i16>(&device, &config, mixer),
                    SampleFormat::U16 => build_output::<u16>(&device, &config, mixer),
                    other => {
                        let _ = ready_tx.send(Err(AudioError::UnsupportedFormat(format!(
                            "playback sample format {:?}",
                            other
                        ))));
                        return;
                    }
                };
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
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
                    shared_for_thread.drain_retired();
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                running,
                worker: Mutex::new(Some(handle)),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::StreamError("playback thread exited early".into()))
            }
        }
    }

    pub fn device_rate(&self) -> u32 {
        self.shared.device_rate.load(Ordering::Acquire)
    }
}

impl AudioOutput for CpalOutput {
    fn current_clock(&self) -> Duration {
        self.shared.clock()
    }

    fn schedule_buffer(&self, unit: PlaybackUnit, on_ended: OnEnded) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(AudioError::DeviceLost("playback closed".into()));
        }
        self.shared.incoming.push(Voice {
            id: unit.id,
            generation: self.shared.generation.load(Ordering::Acquire),
            start_secs: unit.start.as_secs_f64(),
            sample_rate: unit.frame.sample_rate(),
            samples: unit.frame.to_f32(),
            on_ended: Some(on_ended),
        });
        Ok(())
    }

    fn stop_all(&self) {
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn close(&self) {
        self.stop_all();
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            handle.thread().unpark();
        }
        tracing::info!("Playback closed at {:?}", self.current_clock());
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
