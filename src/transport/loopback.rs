//! In-process echo transport
//!
//! Plays the remote agent locally: every media frame sent is answered with the
//! same audio at the output rate, after a configurable delay, as a server
//! JSON frame. Useful for exercising the whole pipeline without a network.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{SessionTransport, TransportHandler};
use crate::audio::capture::LinearResampler;
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::error::TransportError;
use crate::protocol::{self, ControlEvent, WireMessage};

enum Command {
    Open,
    /// Client JSON frame
    Frame(String),
    /// Server-side events to deliver verbatim
    Inject(Vec<WireMessage>),
    Fail(TransportError),
    RemoteClose,
}

struct Shared {
    handler: Mutex<Option<Arc<dyn TransportHandler>>>,
    closed: AtomicBool,
    frames_echoed: AtomicU64,
}

impl Shared {
    /// Current handler, unless the transport has been closed
    fn handler(&self) -> Option<Arc<dyn TransportHandler>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.handler.lock().clone()
    }
}

/// Echoes captured audio back as model audio
pub struct LoopbackTransport {
    input_rate: u32,
    output_rate: u32,
    delay: Duration,
    shared: Arc<Shared>,
    commands: Mutex<Option<Sender<Command>>>,
}

impl LoopbackTransport {
    pub fn new(input_rate: u32, output_rate: u32, delay: Duration) -> Self {
        Self {
            input_rate,
            output_rate,
            delay,
            shared: Arc::new(Shared {
                handler: Mutex::new(None),
                closed: AtomicBool::new(false),
                frames_echoed: AtomicU64::new(0),
            }),
            commands: Mutex::new(None),
        }
    }

    /// Deliver server events as if the remote agent had sent them
    pub fn inject(&self, messages: Vec<WireMessage>) -> Result<(), TransportError> {
        self.command(Command::Inject(messages))
    }

    /// Simulate a fatal remote failure
    pub fn fail(&self, error: TransportError) -> Result<(), TransportError> {
        self.command(Command::Fail(error))
    }

    /// Simulate the remote side hanging up
    pub fn remote_close(&self) -> Result<(), TransportError> {
        self.command(Command::RemoteClose)
    }

    pub fn frames_echoed(&self) -> u64 {
        self.shared.frames_echoed.load(Ordering::Relaxed)
    }

    fn command(&self, command: Command) -> Result<(), TransportError> {
        let commands = self.commands.lock();
        let tx = commands.as_ref().ok_or(TransportError::Closed)?;
        tx.send(command).map_err(|_| TransportError::Closed)
    }
}

impl SessionTransport for LoopbackTransport {
    fn open(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::OpenFailed("transport already closed".into()));
        }
        let mut commands = self.commands.lock();
        if commands.is_some() {
            return Err(TransportError::OpenFailed("transport already open".into()));
        }

        *self.shared.handler.lock() = Some(handler);
        let (tx, rx) = unbounded();
        let worker = Worker {
            shared: self.shared.clone(),
            decoder: FrameDecoder::new(self.input_rate),
            encoder: FrameEncoder::new(self.output_rate),
            resampler: LinearResampler::new(self.input_rate, self.output_rate),
            delay: self.delay,
        };

        thread::Builder::new()
            .name("loopback-transport".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        tx.send(Command::Open)
            .map_err(|_| TransportError::OpenFailed("loopback worker exited".into()))?;
        *commands = Some(tx);

        tracing::info!(
            "Loopback transport opening ({} Hz in, {} Hz out, {:?} delay)",
            self.input_rate,
            self.output_rate,
            self.delay
        );
        Ok(())
    }

    fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let text = protocol::encode_client(&message)?;
        self.command(Command::Frame(text))
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender ends the worker loop
        self.commands.lock().take();
        self.shared.handler.lock().take();
        tracing::info!("Loopback transport closed after echoing {} frames", self.frames_echoed());
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    shared: Arc<Shared>,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    resampler: LinearResampler,
    delay: Duration,
}

impl Worker {
    fn run(mut self, rx: Receiver<Command>) {
        while let Ok(command) = rx.recv() {
            match command {
                Command::Open => {
                    if let Some(handler) = self.shared.handler() {
                        handler.on_open();
                    }
                }
                Command::Frame(text) => self.echo(&text),
                Command::Inject(messages) => self.deliver_server(&messages),
                Command::Fail(error) => {
                    if let Some(handler) = self.shared.handler() {
                        handler.on_error(error);
                    }
                    break;
                }
                Command::RemoteClose => {
                    if let Some(handler) = self.shared.handler() {
                        handler.on_close();
                    }
                    break;
                }
            }
        }
        tracing::debug!("Loopback worker exiting");
    }

    fn echo(&mut self, text: &str) {
        let messages = match protocol::decode_client(text) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Loopback received an invalid client frame: {}", e);
                return;
            }
        };

        let mut replies = Vec::new();
        for message in messages {
            match message {
                WireMessage::Media(chunk) => match self.decoder.decode_f32(&chunk) {
                    Ok(samples) => {
                        let mut resampled = Vec::with_capacity(samples.len() * 2);
                        self.resampler.process(&samples, &mut resampled);
                        replies.push(self.encoder.encode(&resampled));
                    }
                    Err(e) => tracing::warn!("Loopback dropped a capture frame: {}", e),
                },
                WireMessage::Control(ControlEvent::Setup(setup)) => {
                    tracing::debug!("Loopback session setup: {}", setup);
                }
                WireMessage::Control(other) => {
                    tracing::debug!("Loopback ignoring client event {:?}", other);
                }
            }
        }

        if replies.is_empty() {
            return;
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.shared
            .frames_echoed
            .fetch_add(replies.len() as u64, Ordering::Relaxed);
        self.deliver_server(&replies);
    }

    /// Round-trip through the server envelope so inbound traffic takes the
    /// same path as a real connection
    fn deliver_server(&self, messages: &[WireMessage]) {
        let inbound = protocol::encode_server(messages).and_then(|text| protocol::decode_server(&text));
        let inbound = match inbound {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!("Loopback could not build a server frame: {}", e);
                return;
            }
        };
        for message in inbound {
            let Some(handler) = self.shared.handler() else { return };
            handler.on_message(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MediaChunk;

    #[derive(Debug)]
    enum Event {
        Open,
        Message(WireMessage),
        Error(TransportError),
        Close,
    }

    struct Recorder(Sender<Event>);

    impl TransportHandler for Recorder {
        fn on_open(&self) {
            let _ = self.0.send(Event::Open);
        }
        fn on_message(&self, message: WireMessage) {
            let _ = self.0.send(Event::Message(message));
        }
        fn on_error(&self, error: TransportError) {
            let _ = self.0.send(Event::Error(error));
        }
        fn on_close(&self) {
            let _ = self.0.send(Event::Close);
        }
    }

    const WAIT: Duration = Duration::from_secs(2);

    fn opened(transport: &LoopbackTransport) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        transport.open(Arc::new(Recorder(tx))).unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Event::Open));
        rx
    }

    fn media(event: Event) -> MediaChunk {
        match event {
            Event::Message(WireMessage::Media(chunk)) => chunk,
            other => panic!("expected media, got {:?}", other),
        }
    }

    #[test]
    fn test_echo_resamples_to_output_rate() {
        let transport = LoopbackTransport::new(16_000, 24_000, Duration::ZERO);
        let rx = opened(&transport);

        let samples = vec![0.25f32; 160];
        transport.send(FrameEncoder::new(16_000).encode(&samples)).unwrap();

        let chunk = media(rx.recv_timeout(WAIT).unwrap());
        assert_eq!(chunk.mime_type, "audio/pcm;rate=24000");
        let frame = FrameDecoder::new(24_000).decode(&chunk).unwrap();
        // 10 ms of audio either way, give or take the interpolation tail
        assert!((238..=240).contains(&frame.len()), "{}", frame.len());
        assert_eq!(transport.frames_echoed(), 1);
    }

    #[test]
    fn test_setup_is_not_echoed() {
        let transport = LoopbackTransport::new(16_000, 16_000, Duration::ZERO);
        let rx = opened(&transport);

        transport
            .send(WireMessage::Control(ControlEvent::Setup(serde_json::json!({}))))
            .unwrap();
        transport.send(FrameEncoder::new(16_000).encode(&[0.5])).unwrap();

        // The first thing back is the echoed media
        let chunk = media(rx.recv_timeout(WAIT).unwrap());
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn test_inject_control_events() {
        let transport = LoopbackTransport::new(16_000, 24_000, Duration::ZERO);
        let rx = opened(&transport);

        transport
            .inject(vec![
                WireMessage::Control(ControlEvent::TurnComplete),
                WireMessage::Control(ControlEvent::Interrupted),
            ])
            .unwrap();

        // Server envelope order: interrupted before turn complete
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            Event::Message(WireMessage::Control(ControlEvent::Interrupted))
        ));
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            Event::Message(WireMessage::Control(ControlEvent::TurnComplete))
        ));
    }

    #[test]
    fn test_fail_and_remote_close() {
        let transport = LoopbackTransport::new(16_000, 24_000, Duration::ZERO);
        let rx = opened(&transport);
        transport.fail(TransportError::Remote("boom".into())).unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Event::Error(_)));

        let transport = LoopbackTransport::new(16_000, 24_000, Duration::ZERO);
        let rx = opened(&transport);
        transport.remote_close().unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Event::Close));
    }

    #[test]
    fn test_send_before_open_and_after_close() {
        let transport = LoopbackTransport::new(16_000, 24_000, Duration::ZERO);
        let message = FrameEncoder::new(16_000).encode(&[0.0]);
        assert_eq!(transport.send(message.clone()), Err(TransportError::Closed));

        let _rx = opened(&transport);
        transport.close();
        transport.close();
        assert_eq!(transport.send(message), Err(TransportError::Closed));
    }

    #[test]
    fn test_no_events_after_close() {
        let transport = LoopbackTransport::new(16_000, 24_000, Duration::from_millis(50));
        let rx = opened(&transport);
        transport.send(FrameEncoder::new(16_000).encode(&[0.1; 16])).unwrap();
        transport.close();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_open_twice_fails() {
        let transport = LoopbackTransport::new(16_000, 24_000, Duration::ZERO);
        let _rx = opened(&transport);
        let (tx, _) = unbounded();
        assert!(matches!(
            transport.open(Arc::new(Recorder(tx))),
            Err(TransportError::OpenFailed(_))
        ));
    }
}
