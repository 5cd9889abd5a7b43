//! In-memory collaborators for unit tests

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::capture::{CaptureSink, CaptureSource};
use crate::audio::output::{AudioOutput, OnEnded, PlaybackUnit, UnitId};
use crate::error::{AudioError, TransportError};
use crate::protocol::WireMessage;
use crate::transport::{SessionTransport, TransportHandler};

/// Holds a [`FakeCapture::blocking`] capture inside `open()` until released
pub struct OpenLatch {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl OpenLatch {
    /// Block until `open()` has been entered
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("capture open was never entered");
    }

    /// Let the pending `open()` return
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// Capture driven by the test
pub struct FakeCapture {
    sample_rate: u32,
    fail_open: Mutex<Option<AudioError>>,
    latch: Option<(Sender<()>, Receiver<()>)>,
    sink: Mutex<Option<Arc<dyn CaptureSink>>>,
    open: AtomicBool,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl FakeCapture {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fail_open: Mutex::new(None),
            latch: None,
            sink: Mutex::new(None),
            open: AtomicBool::new(false),
            open_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(sample_rate: u32, error: AudioError) -> Self {
        let capture = Self::new(sample_rate);
        *capture.fail_open.lock() = Some(error);
        capture
    }

    /// Capture whose `open()` waits on the returned latch, like a slow device
    pub fn blocking(sample_rate: u32) -> (Self, OpenLatch) {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let mut capture = Self::new(sample_rate);
        capture.latch = Some((entered_tx, release_rx));
        let latch = OpenLatch {
            entered: entered_rx,
            release: release_tx,
        };
        (capture, latch)
    }

    /// Deliver one frame, as the device thread would
    pub fn emit(&self, samples: &[f32]) {
        let sink = self.sink.lock().clone();
        if let (Some(sink), true) = (sink, self.open.load(Ordering::SeqCst)) {
            sink.on_frame(samples);
        }
    }

    /// Deliver a frame even after close, like a straggling device callback
    pub fn emit_late(&self, samples: &[f32]) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.on_frame(samples);
        }
    }

    pub fn lose_device(&self) {
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.on_device_lost(AudioError::DeviceLost("unplugged".into()));
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl CaptureSource for FakeCapture {
    fn open(&self, sink: Arc<dyn CaptureSink>) -> Result<(), AudioError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.latch {
            let _ = entered.send(());
            let _ = release.recv_timeout(Duration::from_secs(5));
        }
        if let Some(error) = self.fail_open.lock().clone() {
            return Err(error);
        }
        *self.sink.lock() = Some(sink);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Transport whose remote side is played by the test
#[derive(Default)]
pub struct FakeTransport {
    fail_open: Mutex<Option<TransportError>>,
    fail_sends: AtomicBool,
    handler: Mutex<Option<Arc<dyn TransportHandler>>>,
    sent: Mutex<Vec<WireMessage>>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: TransportError) -> Self {
        let transport = Self::default();
        *transport.fail_open.lock() = Some(error);
        transport
    }

    fn handler(&self) -> Arc<dyn TransportHandler> {
        self.handler
            .lock()
            .clone()
            .expect("transport was never opened")
    }

    pub fn fire_open(&self) {
        self.handler().on_open();
    }

    pub fn deliver(&self, message: WireMessage) {
        self.handler().on_message(message);
    }

    pub fn fail(&self, error: TransportError) {
        self.handler().on_error(error);
    }

    pub fn remote_close(&self) {
        self.handler().on_close();
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<WireMessage> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl SessionTransport for FakeTransport {
    fn open(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_open.lock().clone() {
            return Err(error);
        }
        *self.handler.lock() = Some(handler);
        Ok(())
    }

    fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("socket reset".into()));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeUnit {
    unit: PlaybackUnit,
    on_ended: Option<OnEnded>,
    stopped: bool,
}

/// Output with a hand-driven clock
#[derive(Default)]
pub struct FakeOutput {
    clock: Mutex<Duration>,
    units: Mutex<Vec<FakeUnit>>,
    fail_next: AtomicBool,
    stop_all_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_clock(&self, clock: Duration) {
        *self.clock.lock() = clock;
    }

    pub fn fail_next_schedule(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Finish a unit naturally
    pub fn complete(&self, id: UnitId) {
        let on_ended = self
            .units
            .lock()
            .iter_mut()
            .find(|u| u.unit.id == id)
            .and_then(|u| u.on_ended.take());
        if let Some(on_ended) = on_ended {
            on_ended(id);
        }
    }

    pub fn scheduled_starts(&self) -> Vec<Duration> {
        self.units.lock().iter().map(|u| u.unit.start).collect()
    }

    /// `(start, end)` of every unit, in scheduling order
    pub fn scheduled_units(&self) -> Vec<(Duration, Duration)> {
        self.units
            .lock()
            .iter()
            .map(|u| (u.unit.start, u.unit.end()))
            .collect()
    }

    /// Units that have neither finished nor been stopped
    pub fn playing(&self) -> usize {
        self.units
            .lock()
            .iter()
            .filter(|u| !u.stopped && u.on_ended.is_some())
            .count()
    }

    pub fn stop_all_calls(&self) -> usize {
        self.stop_all_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl AudioOutput for FakeOutput {
    fn current_clock(&self) -> Duration {
        *self.clock.lock()
    }

    fn schedule_buffer(&self, unit: PlaybackUnit, on_ended: OnEnded) -> Result<(), AudioError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AudioError::DeviceLost("output unplugged".into()));
        }
        self.units.lock().push(FakeUnit {
            unit,
            on_ended: Some(on_ended),
            stopped: false,
        });
        Ok(())
    }

    fn stop_all(&self) {
        self.stop_all_calls.fetch_add(1, Ordering::SeqCst);
        for unit in self.units.lock().iter_mut() {
            unit.stopped = true;
        }
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}
