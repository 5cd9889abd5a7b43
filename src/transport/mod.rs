//! Session transport abstraction
//!
//! A transport carries [`WireMessage`]s to and from the remote agent. Inbound
//! traffic and lifecycle notifications are pushed to a [`TransportHandler`]
//! registered at open time.
//!
//! Implementations must never invoke handler callbacks synchronously from
//! inside `open`, `send` or `close`; the session holds its own locks across
//! those calls.

pub mod loopback;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::TransportError;
use crate::protocol::WireMessage;

pub use loopback::LoopbackTransport;

/// Most messages held back while the transport is still opening
pub const MAX_DEFERRED_MESSAGES: usize = 64;

/// Receives transport events
pub trait TransportHandler: Send + Sync {
    /// The transport is ready for traffic
    fn on_open(&self);

    /// One inbound message
    fn on_message(&self, message: WireMessage);

    /// Fatal transport failure
    fn on_error(&self, error: TransportError);

    /// The remote side closed the connection
    fn on_close(&self);
}

/// Bidirectional message transport
pub trait SessionTransport: Send + Sync {
    /// Begin connecting. Readiness is reported later through
    /// [`TransportHandler::on_open`].
    fn open(&self, handler: Arc<dyn TransportHandler>) -> Result<(), TransportError>;

    /// Send one message; only valid after `on_open`
    fn send(&self, message: WireMessage) -> Result<(), TransportError>;

    /// Release the connection. Idempotent. An event already being delivered
    /// when this runs may still reach the handler, which must ignore it.
    fn close(&self);
}

/// Holds outbound messages submitted before the transport opened and flushes
/// them in order once it does.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    pending: VecDeque<WireMessage>,
    open: bool,
    closed: bool,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send now if open, otherwise hold the message back
    pub fn submit(
        &mut self,
        transport: &dyn SessionTransport,
        message: WireMessage,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.open {
            return transport.send(message);
        }
        if self.pending.len() >= MAX_DEFERRED_MESSAGES {
            return Err(TransportError::SendFailed(format!(
                "{} messages already waiting for the transport to open",
                MAX_DEFERRED_MESSAGES
            )));
        }
        self.pending.push_back(message);
        tracing::debug!("Transport not open yet, deferred message ({} pending)", self.pending.len());
        Ok(())
    }

    /// Mark open and flush everything held back, oldest first.
    ///
    /// On a failed send the rest of the queue is discarded.
    pub fn mark_open(&mut self, transport: &dyn SessionTransport) -> Result<usize, TransportError> {
        if self.closed || self.open {
            return Ok(0);
        }
        self.open = true;

        let count = self.pending.len();
        if count > 0 {
            tracing::info!("Transport open, flushing {} deferred messages", count);
        }
        while let Some(message) = self.pending.pop_front() {
            if let Err(e) = transport.send(message) {
                self.pending.clear();
                return Err(e);
            }
        }
        Ok(count)
    }

    /// Drop anything still pending and refuse further submissions
    pub fn close(&mut self) -> usize {
        self.closed = true;
        self.open = false;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
