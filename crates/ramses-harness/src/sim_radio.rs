//! Scripted in-memory radio.
//!
//! Behaves like a serial gateway from the engine's point of view: every
//! written line comes straight back as the echo, unless the script says
//! to drop it. Responders — closures keyed on what the engine just
//! transmitted — stand in for the devices on the other side of the
//! radio link, and everything written is kept as a transcript for
//! assertions.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use ramses_core::{Transport, TransportError};
use ramses_proto::Frame;
use tokio::sync::mpsc;

/// A scripted peer: sees each transmitted frame, answers with frames.
pub type Responder = Box<dyn FnMut(&Frame) -> Vec<Frame> + Send>;

struct Shared {
    inbound: mpsc::UnboundedSender<String>,
    sent: Vec<Frame>,
    drop_echoes: usize,
    responders: Vec<Responder>,
    fail_writes: bool,
}

/// The engine-facing side of the simulated radio.
pub struct SimRadio {
    rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Mutex<Shared>>,
}

/// The test-facing control side.
#[derive(Clone)]
pub struct SimRadioHandle {
    shared: Arc<Mutex<Shared>>,
}

impl SimRadio {
    /// Create a radio and its control handle.
    #[must_use]
    pub fn new() -> (Self, SimRadioHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared {
            inbound: tx,
            sent: Vec::new(),
            drop_echoes: 0,
            responders: Vec::new(),
            fail_writes: false,
        }));
        (Self { rx, shared: Arc::clone(&shared) }, SimRadioHandle { shared })
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SimRadioHandle {
    /// Deliver a raw line to the engine, as if received off-air.
    pub fn inject(&self, line: &str) {
        let _ = lock(&self.shared).inbound.send(line.to_string());
    }

    /// Deliver a frame to the engine.
    pub fn inject_frame(&self, frame: &Frame) {
        self.inject(&frame.encode());
    }

    /// Everything the engine has transmitted, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Frame> {
        lock(&self.shared).sent.clone()
    }

    /// Swallow the next `n` echoes (simulates transmit loss).
    pub fn drop_next_echoes(&self, n: usize) {
        lock(&self.shared).drop_echoes += n;
    }

    /// Make every subsequent write fail (simulates a dead adapter).
    pub fn fail_writes(&self) {
        lock(&self.shared).fail_writes = true;
    }

    /// Install a scripted peer.
    pub fn respond_with(&self, responder: impl FnMut(&Frame) -> Vec<Frame> + Send + 'static) {
        lock(&self.shared).responders.push(Box::new(responder));
    }
}

#[async_trait]
impl Transport for SimRadio {
    async fn recv_line(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut shared = lock(&self.shared);
        if shared.fail_writes {
            return Err(TransportError::Closed);
        }

        let frame = match Frame::decode(line) {
            Ok(frame) => frame,
            Err(error) => {
                // the engine never writes malformed lines; surface loudly
                tracing::error!(%error, line, "sim radio received a bad write");
                return Err(TransportError::Closed);
            },
        };
        shared.sent.push(frame.clone());

        if shared.drop_echoes > 0 {
            shared.drop_echoes -= 1;
            tracing::debug!(line, "sim radio dropped echo");
        } else {
            let _ = shared.inbound.send(line.to_string());
        }

        let mut replies = Vec::new();
        for responder in &mut shared.responders {
            replies.extend(responder(&frame));
        }
        for reply in replies {
            let _ = shared.inbound.send(reply.encode());
        }
        Ok(())
    }
}
