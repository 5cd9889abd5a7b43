//! Session orchestration
//!
//! [`SessionController`] owns one capture source, one transport and one audio
//! output, and wires them together:
//!
//! - capture frames are encoded and sent while the session is `Active`, and
//!   dropped while `Connecting` or `Muted`
//! - inbound media is decoded and handed to the playback scheduler
//! - `Interrupted` flushes everything queued for playback
//! - `stop()`, a transport error or close, and device loss all converge on a
//!   single teardown that leaves the output silent and every handle released
//!
//! Two locks guard the controller: `core` (lifecycle) and `gate` (outbound
//! path). They are always taken in that order, and neither is held while a
//! collaborator is being closed.

use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

use super::scheduler::PlaybackScheduler;
use super::state::{SessionEvent, SessionState, StateChange};
use crate::audio::capture::{CaptureSink, CaptureSource};
use crate::audio::output::AudioOutput;
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::config::AppConfig;
use crate::error::{AudioError, ConfigError, SessionError, TransportError};
use crate::protocol::{ControlEvent, WireMessage};
use crate::transport::{DeferredQueue, SessionTransport, TransportHandler};

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: Uuid,
    pub state: SessionState,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub frames_captured: u64,
    pub frames_sent: u64,
    /// Capture frames discarded while muted or still connecting
    pub frames_dropped: u64,
    pub messages_received: u64,
    pub frames_malformed: u64,
    pub units_scheduled: u64,
    pub units_active: usize,
    pub interruptions: u64,
}

/// Why the session is being torn down
#[derive(Debug)]
enum Cause {
    Stop,
    RemoteClose,
    RemoteError(TransportError),
    DeviceLost(AudioError),
    StartFailed(SessionError),
    SendFailed(TransportError),
    PlaybackFailed(AudioError),
}

impl Cause {
    /// Terminal reason recorded as `last_error`, given the state teardown
    /// began in
    fn reason(&self, from: SessionState) -> Option<SessionError> {
        let connecting = from == SessionState::Connecting;
        match self {
            Cause::Stop => None,
            Cause::RemoteClose if connecting => Some(SessionError::TransportOpenFailed(
                "connection closed before it opened".into(),
            )),
            Cause::RemoteClose => None,
            Cause::RemoteError(e) if connecting => {
                Some(SessionError::TransportOpenFailed(e.to_string()))
            }
            Cause::RemoteError(e) | Cause::SendFailed(e) => {
                Some(SessionError::TransportError(e.to_string()))
            }
            Cause::DeviceLost(e) | Cause::PlaybackFailed(e) => {
                Some(SessionError::DeviceUnavailable(e.to_string()))
            }
            Cause::StartFailed(e) => Some(e.clone()),
        }
    }
}

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    messages_received: AtomicU64,
    frames_malformed: AtomicU64,
}

struct Core {
    state: SessionState,
    last_error: Option<SessionError>,
    /// Set once teardown begins; later teardown requests are no-ops
    closing: bool,
    /// `start()` is opening collaborators; teardown leaves releasing them
    /// to `start()`
    acquiring: bool,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    subscribers: Vec<Sender<StateChange>>,
}

/// Outbound path
struct Gate {
    /// Capture frames are encoded and sent only while this is set
    forwarding: bool,
    queue: DeferredQueue,
}

struct Inner {
    id: Uuid,
    setup: Option<Value>,
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    scheduler: PlaybackScheduler,
    capture: Arc<dyn CaptureSource>,
    transport: Arc<dyn SessionTransport>,
    output: Arc<dyn AudioOutput>,
    core: Mutex<Core>,
    gate: Mutex<Gate>,
    counters: Counters,
}

/// One duplex voice session.
///
/// Not `Clone`: a session has exactly one owner. Dropping the controller
/// tears the session down.
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        config: &AppConfig,
        capture: Arc<dyn CaptureSource>,
        transport: Arc<dyn SessionTransport>,
        output: Arc<dyn AudioOutput>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let audio = &config.audio;
        if capture.sample_rate() != audio.input_sample_rate {
            return Err(ConfigError::Invalid(format!(
                "capture delivers {} Hz but the session sends {} Hz",
                capture.sample_rate(),
                audio.input_sample_rate
            )));
        }

        let id = Uuid::new_v4();
        tracing::debug!(session = %id, "Session created");

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                setup: config.session.setup.clone(),
                encoder: FrameEncoder::new(audio.input_sample_rate),
                decoder: FrameDecoder::new(audio.output_sample_rate),
                scheduler: PlaybackScheduler::new(output.clone()),
                capture,
                transport,
                output,
                core: Mutex::new(Core {
                    state: SessionState::Idle,
                    last_error: None,
                    closing: false,
                    acquiring: false,
                    started_at: None,
                    ended_at: None,
                    subscribers: Vec::new(),
                }),
                gate: Mutex::new(Gate {
                    forwarding: false,
                    queue: DeferredQueue::new(),
                }),
                counters: Counters::default(),
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Acquire the microphone and connect the transport.
    ///
    /// On failure every resource already acquired is released, the session
    /// ends `Closed`, and the reason is both returned and kept as
    /// [`last_error`](Self::last_error). A `stop()` that lands while the
    /// devices are opening wins: `start()` releases them and returns an error.
    pub fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        {
            let mut core = inner.core.lock();
            match core.state {
                SessionState::Idle => {}
                SessionState::Closed => {
                    return Err(SessionError::InvalidTransition {
                        from: SessionState::Closed,
                        event: "start",
                    })
                }
                other => {
                    tracing::warn!(session = %inner.id, "start() ignored while {}", other);
                    return Ok(());
                }
            }
            core.started_at = Some(Utc::now());
            core.acquiring = true;
            inner.apply(&mut core, SessionEvent::Start);
        }

        tracing::info!(session = %inner.id, "Starting session");

        if let Some(setup) = &inner.setup {
            let message = WireMessage::Control(ControlEvent::Setup(setup.clone()));
            if let Err(e) = inner.gate.lock().queue.submit(inner.transport.as_ref(), message) {
                tracing::warn!("Could not queue session setup: {}", e);
            }
        }

        let events = Arc::new(SessionEvents {
            inner: Arc::downgrade(inner),
        });

        let acquired = inner.acquire(events);
        let closing = {
            let mut core = inner.core.lock();
            core.acquiring = false;
            core.closing
        };

        match (acquired, closing) {
            (Ok(()), false) => Ok(()),
            (Err(reason), false) => {
                inner.shutdown(Cause::StartFailed(reason.clone()));
                Err(reason)
            }
            // Teardown began while opening; its release was left to us
            (Err(reason), true) => {
                inner.release();
                Err(reason)
            }
            (Ok(()), true) => {
                inner.release();
                let reason = inner.core.lock().last_error.clone();
                Err(reason.unwrap_or(SessionError::InvalidTransition {
                    from: SessionState::Terminating,
                    event: "start",
                }))
            }
        }
    }

    /// Tear the session down. Idempotent.
    pub fn stop(&self) {
        self.inner.shutdown(Cause::Stop);
    }

    /// Stop sending microphone audio; capture stays open
    pub fn mute(&self) -> Result<(), SessionError> {
        self.inner.set_muted(true)
    }

    pub fn unmute(&self) -> Result<(), SessionError> {
        self.inner.set_muted(false)
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn is_muted(&self) -> bool {
        self.state() == SessionState::Muted
    }

    /// Terminal reason, if the session ended on an error
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.core.lock().last_error.clone()
    }

    /// Receive every subsequent state change
    pub fn subscribe(&self) -> Receiver<StateChange> {
        let (tx, rx) = unbounded();
        self.inner.core.lock().subscribers.push(tx);
        rx
    }

    pub fn status(&self) -> SessionStatus {
        let inner = &self.inner;
        let core = inner.core.lock();
        let scheduler = inner.scheduler.stats();
        let counters = &inner.counters;
        SessionStatus {
            id: inner.id,
            state: core.state,
            last_error: core.last_error.as_ref().map(|e| e.to_string()),
            started_at: core.started_at,
            ended_at: core.ended_at,
            frames_captured: counters.frames_captured.load(Ordering::Relaxed),
            frames_sent: counters.frames_sent.load(Ordering::Relaxed),
            frames_dropped: counters.frames_dropped.load(Ordering::Relaxed),
            messages_received: counters.messages_received.load(Ordering::Relaxed),
            frames_malformed: counters.frames_malformed.load(Ordering::Relaxed),
            units_scheduled: scheduler.scheduled,
            units_active: scheduler.active,
            interruptions: scheduler.interruptions,
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.inner.shutdown(Cause::Stop);
    }
}

impl Inner {
    /// Apply a lifecycle event, publishing the change. Rejected events are
    /// logged and leave the state untouched.
    fn apply(&self, core: &mut Core, event: SessionEvent) -> bool {
        let from = core.state;
        let Some(to) = from.next(event) else {
            tracing::warn!(session = %self.id, "{:?} ignored while {}", event, from);
            return false;
        };
        if to == from {
            return true;
        }

        core.state = to;
        tracing::info!(session = %self.id, "Session {} -> {}", from, to);

        let change = StateChange {
            from,
            to,
            at: Utc::now(),
        };
        core.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        true
    }

    /// Open the capture, then the transport. The transport is skipped when
    /// teardown began while the capture was opening.
    fn acquire(&self, events: Arc<SessionEvents>) -> Result<(), SessionError> {
        self.capture.open(events.clone())?;
        if self.core.lock().closing {
            tracing::debug!(session = %self.id, "Stopped while opening capture");
            return Ok(());
        }
        self.transport
            .open(events)
            .map_err(|e| SessionError::TransportOpenFailed(e.to_string()))
    }

    fn set_muted(&self, muted: bool) -> Result<(), SessionError> {
        let (event, name) = if muted {
            (SessionEvent::Mute, "mute")
        } else {
            (SessionEvent::Unmute, "unmute")
        };

        let mut core = self.core.lock();
        if core.state == SessionState::Closed {
            return Err(SessionError::InvalidTransition {
                from: SessionState::Closed,
                event: name,
            });
        }
        if core.closing || core.state.next(event).is_none() {
            tracing::warn!(session = %self.id, "{}() ignored while {}", name, core.state);
            return Ok(());
        }

        // Waits out any frame currently being sent
        self.gate.lock().forwarding = !muted;
        self.apply(&mut core, event);
        Ok(())
    }

    fn handle_open(&self) {
        let flushed = {
            let mut core = self.core.lock();
            if core.closing || !self.apply(&mut core, SessionEvent::Opened) {
                return;
            }
            self.scheduler.anchor();

            let mut gate = self.gate.lock();
            gate.forwarding = true;
            gate.queue.mark_open(self.transport.as_ref())
        };

        match flushed {
            Ok(0) => {}
            Ok(count) => tracing::debug!(session = %self.id, "Flushed {} deferred messages", count),
            Err(e) => self.shutdown(Cause::SendFailed(e)),
        }
    }

    fn handle_message(&self, message: WireMessage) {
        {
            let core = self.core.lock();
            if core.closing || !core.state.is_live() {
                tracing::debug!(session = %self.id, "Dropping inbound {:?} while {}", message.kind(), core.state);
                return;
            }
        }
        self.counters.messages_received.fetch_add(1, Ordering::Relaxed);

        match message {
            WireMessage::Media(chunk) => match self.decoder.decode(&chunk) {
                Ok(frame) => {
                    if let Err(e) = self.scheduler.schedule(frame) {
                        tracing::error!(session = %self.id, "Playback failed: {}", e);
                        self.shutdown(Cause::PlaybackFailed(e));
                    }
                }
                Err(e) => {
                    self.counters.frames_malformed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(session = %self.id, "Dropping inbound frame: {}", e);
                }
            },
            WireMessage::Control(ControlEvent::Interrupted) => {
                {
                    let mut core = self.core.lock();
                    if core.closing || !self.apply(&mut core, SessionEvent::Interrupted) {
                        return;
                    }
                }
                let stopped = self.scheduler.interrupt();
                tracing::info!(session = %self.id, "Interrupted, stopped {} playback units", stopped);
            }
            WireMessage::Control(ControlEvent::TurnComplete) => {
                tracing::debug!(session = %self.id, "Turn complete");
            }
            WireMessage::Control(ControlEvent::Setup(_)) => {
                tracing::warn!(session = %self.id, "Ignoring setup message from the remote side");
            }
        }
    }

    fn handle_frame(&self, samples: &[f32]) {
        self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);

        let sent = {
            let mut gate = self.gate.lock();
            if !gate.forwarding {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let message = self.encoder.encode(samples);
            gate.queue.submit(self.transport.as_ref(), message)
        };

        match sent {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(session = %self.id, "Send failed: {}", e);
                self.shutdown(Cause::SendFailed(e));
            }
        }
    }

    /// Single teardown path for every cause
    fn shutdown(&self, cause: Cause) {
        let release_now = {
            let mut core = self.core.lock();
            let from = core.state;
            if core.closing || from == SessionState::Closed {
                return;
            }
            if from == SessionState::Idle {
                tracing::debug!(session = %self.id, "{:?} ignored while idle", cause);
                return;
            }
            core.closing = true;

            if let Some(reason) = cause.reason(from) {
                tracing::error!(session = %self.id, "Session ending: {}", reason);
                core.last_error.get_or_insert(reason);
            }
            // A failed start goes straight from Connecting to Closed
            if !matches!(cause, Cause::StartFailed(_)) {
                self.apply(&mut core, SessionEvent::Teardown);
            }
            !core.acquiring
        };

        {
            let mut gate = self.gate.lock();
            gate.forwarding = false;
            let dropped = gate.queue.close();
            if dropped > 0 {
                tracing::debug!(session = %self.id, "Discarded {} deferred messages", dropped);
            }
        }

        self.scheduler.shutdown();
        if release_now {
            self.release();
        } else {
            tracing::debug!(session = %self.id, "Release deferred to start()");
        }
    }

    /// Close every collaborator and finish in `Closed`. Runs once, after
    /// teardown has begun.
    fn release(&self) {
        self.capture.close();
        self.transport.close();
        self.output.close();

        let mut core = self.core.lock();
        core.ended_at = Some(Utc::now());
        self.apply(&mut core, SessionEvent::Released);
    }
}

/// Callback adapter handed to the capture source and the transport.
///
/// Holds the session weakly so collaborators that outlive it cannot keep it
/// alive; events for a dropped session vanish.
struct SessionEvents {
    inner: Weak<Inner>,
}

impl CaptureSink for SessionEvents {
    fn on_frame(&self, samples: &[f32]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_frame(samples);
        }
    }

    fn on_device_lost(&self, error: AudioError) {
        if let Some(inner) = self.inner.upgrade() {
            tracing::error!(session = %inner.id, "Capture device lost: {}", error);
            inner.shutdown(Cause::DeviceLost(error));
        }
    }
}

impl TransportHandler for SessionEvents {
    fn on_open(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_open();
        }
    }

    fn on_message(&self, message: WireMessage) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_message(message);
        }
    }

    fn on_error(&self, error: TransportError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.shutdown(Cause::RemoteError(error));
        }
    }

    fn on_close(&self) {
        if let Some(inner) = self.inner.upgrade() {
            tracing::info!(session = %inner.id, "Remote side closed the connection");
            inner.shutdown(Cause::RemoteClose);
        }
    }
}
