//! ModuleClient: the context object an application holds for its module.
//!
//! [`ModuleClient`] ties the pieces together:
//! - the [`SendGate`] guarding the identity and the transport,
//! - the [`IdentityAnnouncer`] publishing the standing identity,
//! - the [`InboundDispatcher`] running the broker handshake.
//!
//! Create one per process and pass it where it is needed. Nothing in this
//! crate keeps a global instance.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::info;

use crate::announcer::IdentityAnnouncer;
use crate::dispatcher::{InboundDispatcher, InboundHandler, InboundMessage};
use crate::error::ModuleError;
use crate::gate::SendGate;
use crate::identity::{ConnectionState, ModuleIdentity};
use crate::message::MessageType;
use crate::transport::{ReceiveCallback, Transport};

/// A module participating in the fleet.
pub struct ModuleClient {
    gate: Arc<SendGate>,
    announcer: IdentityAnnouncer,
    dispatcher: Arc<InboundDispatcher>,
}

impl ModuleClient {
    /// Create a client for `identity`. No transport is attached yet; sends
    /// fail with [`ModuleError::NotInitialized`] until [`attach`](Self::attach).
    pub fn new(identity: ModuleIdentity) -> Self {
        let gate = Arc::new(SendGate::new(identity));
        let announcer = IdentityAnnouncer::new(Arc::clone(&gate));
        let dispatcher = Arc::new(InboundDispatcher::new(
            Arc::clone(&gate),
            announcer.clone(),
        ));
        Self {
            gate,
            announcer,
            dispatcher,
        }
    }

    /// Callback to hand to the transport. Holds the dispatcher weakly so the
    /// transport does not keep a dropped client alive.
    pub fn receive_callback(&self) -> ReceiveCallback {
        let dispatcher: Weak<InboundDispatcher> = Arc::downgrade(&self.dispatcher);
        Arc::new(move |frame: &[u8]| {
            if let Some(dispatcher) = dispatcher.upgrade() {
                dispatcher.receive(frame);
            }
        })
    }

    /// Attach a transport and publish the identity as an initial probe.
    ///
    /// Attaching over an existing transport counts as a reconnection: the
    /// identity is re-published with `resend` following the current state.
    pub fn attach(&self, transport: Arc<dyn Transport>) -> Result<(), ModuleError> {
        let reattached = self.gate.is_attached();
        self.gate.attach(transport);
        if reattached {
            return self.on_reconnect();
        }
        let module_id = self.gate.with_identity(|identity| identity.module_id().to_string());
        info!("Module '{module_id}' attached to transport");
        self.announcer.announce(true)
    }

    /// Feed one inbound frame. Never fails.
    pub fn receive(&self, frame: &[u8]) {
        self.dispatcher.receive(frame);
    }

    /// Register the application handler for accepted inbound messages.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&InboundMessage<'_>) + Send + Sync + 'static,
    {
        let handler: InboundHandler = Arc::new(handler);
        self.dispatcher.set_handler(handler);
    }

    /// Send a JSON command to `target_id` (empty for the group).
    pub fn send_json(
        &self,
        target_id: &str,
        command: Value,
        message_type: impl Into<MessageType>,
        internal: bool,
    ) -> Result<(), ModuleError> {
        self.gate
            .send_json(target_id, command, message_type.into(), internal)
    }

    /// Send `command` as a JSON header followed by a binary payload.
    pub fn send_binary(
        &self,
        target_id: &str,
        payload: &[u8],
        message_type: impl Into<MessageType>,
        internal: bool,
        command: Value,
    ) -> Result<(), ModuleError> {
        self.gate
            .send_binary(target_id, payload, message_type.into(), internal, command)
    }

    /// Send a system message to the broker.
    pub fn send_system(
        &self,
        command: Value,
        message_type: impl Into<MessageType>,
    ) -> Result<(), ModuleError> {
        self.gate.send_system(command, message_type.into())
    }

    /// Send an inter-module remote-execute request.
    pub fn send_remote_execute(&self, command_type: i64) -> Result<(), ModuleError> {
        self.gate.send_remote_execute(command_type)
    }

    /// Relay an already-encoded frame unchanged.
    pub fn forward(&self, frame: &[u8]) -> Result<(), ModuleError> {
        self.gate.forward(frame)
    }

    /// Re-publish the standing identity.
    pub fn reannounce(&self, resend: bool) -> Result<(), ModuleError> {
        self.announcer.announce(resend)
    }

    /// Notify the client that the transport (re)connected.
    pub fn on_reconnect(&self) -> Result<(), ModuleError> {
        self.announcer.on_reconnect()
    }

    /// Assign a module key from outside the handshake.
    pub fn set_module_key(&self, module_key: impl Into<String>) {
        let module_key = module_key.into();
        self.gate
            .with_identity_mut(|identity| identity.set_module_key(module_key));
    }

    pub fn module_key(&self) -> String {
        self.gate
            .with_identity(|identity| identity.module_key().to_string())
    }

    pub fn party_id(&self) -> String {
        self.gate.with_identity(|identity| identity.party_id().to_string())
    }

    pub fn group_id(&self) -> String {
        self.gate.with_identity(|identity| identity.group_id().to_string())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.gate.with_identity(ModuleIdentity::state)
    }

    /// A copy of the identity as it stands now.
    pub fn identity_snapshot(&self) -> ModuleIdentity {
        self.gate.with_identity(ModuleIdentity::clone)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
