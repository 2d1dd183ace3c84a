//! Identity announcer: publishes the standing identity payload.
//!
//! The transport re-broadcasts the payload on its own schedule until the
//! broker answers, so announcing is a matter of replacing that payload.
//! `resend = true` marks an initial probe; after the handshake the identity
//! is re-published once with `resend = false`.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::ModuleError;
use crate::gate::SendGate;
use crate::identity::{ConnectionState, ModuleIdentity};
use crate::message::{Envelope, MessageType};

/// Build the identity-announcement envelope for `identity`.
pub fn announcement(identity: &ModuleIdentity, resend: bool) -> Envelope {
    Envelope::control(
        MessageType::MODULE_IDENTITY,
        identity.announcement_command(resend),
    )
}

/// Publishes this module's identity to the transport.
#[derive(Clone)]
pub struct IdentityAnnouncer {
    gate: Arc<SendGate>,
}

impl IdentityAnnouncer {
    pub fn new(gate: Arc<SendGate>) -> Self {
        Self { gate }
    }

    /// Rebuild the announcement from the current identity and hand it to the
    /// transport as the standing payload.
    pub fn announce(&self, resend: bool) -> Result<(), ModuleError> {
        self.gate.publish(|identity| {
            let json = serde_json::to_string(&announcement(identity, resend))?;
            debug!(
                "Publishing identity of '{}' (resend: {resend}, {} bytes)",
                identity.module_id(),
                json.len()
            );
            Ok(json)
        })
    }

    /// Called when the transport (re)connects. Re-announces as an initial
    /// probe while no broker has answered yet; otherwise keeps announcing the
    /// bound identity.
    pub fn on_reconnect(&self) -> Result<(), ModuleError> {
        let bound = self
            .gate
            .with_identity(|identity| identity.state() == ConnectionState::Bound);
        info!("Transport reconnected, re-announcing identity (bound: {bound})");
        self.announce(!bound)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
