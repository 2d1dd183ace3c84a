//! Send gate: serializes every construct-and-send sequence.
//!
//! One reentrant lock guards the module identity and the attached transport.
//! Holding it across envelope build, serialization and the hand-off to the
//! transport means concurrent senders can never interleave frames, and the
//! dispatcher's identity updates are never observed half-done. The lock is
//! reentrant so the handshake can re-announce while it already holds it.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use serde_json::{Value, json};
use tracing::debug;

use crate::codec;
use crate::error::ModuleError;
use crate::identity::ModuleIdentity;
use crate::message::{Envelope, MessageType};
use crate::transport::Transport;

struct GateState {
    identity: ModuleIdentity,
    transport: Option<Arc<dyn Transport>>,
}

/// Mutual-exclusion boundary around the identity and the transport.
pub struct SendGate {
    state: ReentrantMutex<RefCell<GateState>>,
}

impl SendGate {
    pub fn new(identity: ModuleIdentity) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(GateState {
                identity,
                transport: None,
            })),
        }
    }

    /// Install (or replace) the transport frames are handed to.
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        let guard = self.state.lock();
        guard.borrow_mut().transport = Some(transport);
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().borrow().transport.is_some()
    }

    /// Read the identity under the lock.
    pub fn with_identity<R>(&self, f: impl FnOnce(&ModuleIdentity) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state.identity)
    }

    /// Mutate the identity under the lock.
    ///
    /// `f` must not call back into the gate.
    pub fn with_identity_mut<R>(&self, f: impl FnOnce(&mut ModuleIdentity) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state.identity)
    }

    /// Run `f` while holding the gate. Any gate operation may be called from
    /// inside `f`; they re-enter the same lock.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.state.lock();
        f()
    }

    /// Build a frame from the current identity and hand it to the transport,
    /// all under the lock. If `build` fails nothing is sent.
    pub fn transmit<F>(&self, build: F) -> Result<(), ModuleError>
    where
        F: FnOnce(&ModuleIdentity) -> Result<Vec<u8>, serde_json::Error>,
    {
        let guard = self.state.lock();
        let (transport, frame) = {
            let state = guard.borrow();
            let transport = state.transport.clone().ok_or(ModuleError::NotInitialized)?;
            (transport, build(&state.identity)?)
        };
        debug!("Sending frame ({} bytes)", frame.len());
        transport.send(&frame)?;
        Ok(())
    }

    /// Build the standing identity payload from the current identity and
    /// register it with the transport, under the lock.
    pub fn publish<F>(&self, build: F) -> Result<(), ModuleError>
    where
        F: FnOnce(&ModuleIdentity) -> Result<String, serde_json::Error>,
    {
        let guard = self.state.lock();
        let (transport, payload) = {
            let state = guard.borrow();
            let transport = state.transport.clone().ok_or(ModuleError::NotInitialized)?;
            (transport, build(&state.identity)?)
        };
        transport.set_identity_payload(payload);
        Ok(())
    }

    /// Send a JSON command. Routing follows
    /// [`RoutingType::select`](crate::message::RoutingType::select).
    pub fn send_json(
        &self,
        target_id: &str,
        command: Value,
        message_type: MessageType,
        internal: bool,
    ) -> Result<(), ModuleError> {
        self.transmit(|identity| {
            let envelope = Envelope::addressed(
                identity.module_key(),
                target_id,
                internal,
                message_type,
                command,
            );
            codec::encode_text(&envelope)
        })
    }

    /// Send a hybrid frame: `command` as the JSON header, `payload` as the
    /// binary suffix.
    pub fn send_binary(
        &self,
        target_id: &str,
        payload: &[u8],
        message_type: MessageType,
        internal: bool,
        command: Value,
    ) -> Result<(), ModuleError> {
        self.transmit(|identity| {
            let envelope = Envelope::addressed(
                identity.module_key(),
                target_id,
                internal,
                message_type,
                command,
            );
            codec::encode_hybrid(&envelope, payload)
        })
    }

    /// Send a system message to the broker itself.
    pub fn send_system(&self, command: Value, message_type: MessageType) -> Result<(), ModuleError> {
        self.transmit(|_| codec::encode_text(&Envelope::system(message_type, command)))
    }

    /// Ask the broker to run an inter-module remote-execute command.
    pub fn send_remote_execute(&self, command_type: i64) -> Result<(), ModuleError> {
        self.transmit(|identity| {
            let mut envelope = Envelope::control(
                MessageType::MODULE_REMOTE_EXECUTE,
                json!({ "C": command_type }),
            );
            envelope.module_key = Some(identity.module_key().to_string());
            codec::encode_text(&envelope)
        })
    }

    /// Pass an already-encoded frame to the transport unchanged.
    pub fn forward(&self, frame: &[u8]) -> Result<(), ModuleError> {
        self.transmit(|_| Ok(frame.to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
