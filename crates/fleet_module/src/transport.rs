//! Transport contract: the narrow interface the module layer needs from a
//! datagram transport.
//!
//! The module layer never touches sockets. It hands complete frames to
//! [`Transport::send`] and registers its standing identity payload with
//! [`Transport::set_identity_payload`]. Inbound frames arrive through the
//! [`ReceiveCallback`] the transport was constructed with.
//!
//! Two implementations ship with the crate:
//! - [`UdpTransport`](crate::udp::UdpTransport) for real deployments.
//! - [`MemoryTransport`] which records everything, for tests and loopback.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TransportError;

/// Called once per reassembled inbound frame, on the transport's own task.
pub type ReceiveCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Best-effort, unordered, unreliable frame transport.
pub trait Transport: Send + Sync {
    /// Queue one complete frame for transmission. Fragmentation of frames
    /// larger than a datagram is the transport's job.
    fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Register or replace the payload the transport re-broadcasts on its own
    /// schedule.
    fn set_identity_payload(&self, payload: String);
}

/// In-memory transport that records outbound frames and identity payloads.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<Vec<u8>>>,
    identity_payloads: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame passed to `send`, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    /// Every payload passed to `set_identity_payload`, in order.
    pub fn identity_payloads(&self) -> Vec<String> {
        self.identity_payloads.lock().clone()
    }

    /// The payload currently standing, if any.
    pub fn current_identity(&self) -> Option<String> {
        self.identity_payloads.lock().last().cloned()
    }

    /// Make further sends fail with [`TransportError::Closed`].
    pub fn close(&self) {
        *self.closed.lock() = true;
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        if *self.closed.lock() {
            return Err(TransportError::Closed);
        }
        self.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn set_identity_payload(&self, payload: String) {
        self.identity_payloads.lock().push(payload);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
