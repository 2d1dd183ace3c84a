//! Inbound dispatcher: classifies every inbound frame, runs the broker
//! handshake and forwards application messages to the registered handler.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::announcer::IdentityAnnouncer;
use crate::codec;
use crate::error::InboundError;
use crate::gate::SendGate;
use crate::message::{AssignedIds, Command, MessageType, RoutingType};
use crate::protocol;

/// A frame accepted by the dispatcher, as seen by the application handler.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage<'a> {
    /// The frame exactly as received.
    pub raw: &'a [u8],
    /// The parsed JSON header.
    pub json: &'a Value,
    /// Bytes after the first NUL separator, if the frame had one.
    pub trailing: Option<&'a [u8]>,
}

impl InboundMessage<'_> {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.json
            .get(protocol::KEY_MESSAGE_TYPE)
            .and_then(MessageType::from_value)
    }

    pub fn routing_type(&self) -> Option<RoutingType> {
        self.json
            .get(protocol::KEY_ROUTING_TYPE)
            .and_then(Value::as_str)
            .and_then(RoutingType::from_tag)
    }

    /// Decode the command according to the message type.
    pub fn command(&self) -> Command {
        let command = self.json.get(protocol::KEY_COMMAND).unwrap_or(&Value::Null);
        match self.message_type() {
            Some(message_type) => Command::decode(&message_type, command),
            None => Command::Opaque(command.clone()),
        }
    }
}

/// Application callback for accepted inbound messages.
///
/// Invoked on the transport's receive task with the send gate released, so
/// the handler may send synchronously.
pub type InboundHandler = Arc<dyn Fn(&InboundMessage<'_>) + Send + Sync>;

/// How a well-formed frame was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Broker confirmation of our identity.
    IdentityConfirmed(AssignedIds),
    /// Reserved no-op probe.
    Probe,
    /// Anything else; goes to the application.
    Application,
}

/// What happened to a frame that passed classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Identity confirmed. `first_contact` is true when this frame bound us.
    Confirmed { first_contact: bool, forwarded: bool },
    /// Probe logged and dropped.
    Probe,
    /// Application message; `forwarded` is false when no handler is set.
    Delivered { forwarded: bool },
}

/// Classify a parsed header.
pub fn classify(json: &Value) -> Result<Classification, InboundError> {
    let message_type = json
        .get(protocol::KEY_MESSAGE_TYPE)
        .ok_or(InboundError::MissingField(protocol::KEY_MESSAGE_TYPE))?;
    let routing_type = json
        .get(protocol::KEY_ROUTING_TYPE)
        .ok_or(InboundError::MissingField(protocol::KEY_ROUTING_TYPE))?;

    if routing_type.as_str() != Some(protocol::ROUTE_INTERMODULE) {
        return Ok(Classification::Application);
    }

    let command = json
        .get(protocol::KEY_COMMAND)
        .ok_or(InboundError::MissingField(protocol::KEY_COMMAND))?;

    match MessageType::from_value(message_type) {
        Some(t) if t == MessageType::MODULE_IDENTITY => {
            confirmation_ids(command).map(Classification::IdentityConfirmed)
        }
        Some(t) if t == MessageType::DUMMY => Ok(Classification::Probe),
        _ => Ok(Classification::Application),
    }
}

fn confirmation_ids(command: &Value) -> Result<AssignedIds, InboundError> {
    let ids = command
        .get(protocol::CONFIRM_IDENTITY)
        .ok_or_else(|| InboundError::ProtocolViolation("identity reply without 'f'".into()))?;
    let field = |key: &str| match ids.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(InboundError::ProtocolViolation(format!(
            "identity reply without 'f.{key}'"
        ))),
    };
    Ok(AssignedIds {
        party_id: field(protocol::CONFIRM_SENDER)?,
        group_id: field(protocol::CONFIRM_GROUP)?,
    })
}

/// Receive-side state machine.
pub struct InboundDispatcher {
    gate: Arc<SendGate>,
    announcer: IdentityAnnouncer,
    handler: RwLock<Option<InboundHandler>>,
}

impl InboundDispatcher {
    pub fn new(gate: Arc<SendGate>, announcer: IdentityAnnouncer) -> Self {
        Self {
            gate,
            announcer,
            handler: RwLock::new(None),
        }
    }

    /// Register (or replace) the application handler.
    pub fn set_handler(&self, handler: InboundHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn clear_handler(&self) {
        *self.handler.write() = None;
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().is_some()
    }

    /// Transport entry point. Never fails: rejected frames are logged and
    /// dropped.
    pub fn receive(&self, frame: &[u8]) {
        debug!("RX frame ({} bytes)", frame.len());
        match self.process(frame) {
            Ok(outcome) => debug!("RX outcome: {outcome:?}"),
            Err(e @ InboundError::MalformedJson(_)) => debug!("Dropping frame: {e}"),
            Err(e) => warn!("Dropping frame: {e}"),
        }
    }

    /// Parse, classify and act on one frame.
    pub fn process(&self, frame: &[u8]) -> Result<Outcome, InboundError> {
        let json = codec::decode_header(frame)?;
        let classification = classify(&json)?;
        let (_, trailing) = codec::split_frame(frame);
        let message = InboundMessage {
            raw: frame,
            json: &json,
            trailing,
        };

        match classification {
            Classification::IdentityConfirmed(ids) => {
                let first_contact = self.bind(&ids);
                let forwarded = self.forward(&message);
                Ok(Outcome::Confirmed {
                    first_contact,
                    forwarded,
                })
            }
            Classification::Probe => {
                debug!("Probe message: {json}");
                Ok(Outcome::Probe)
            }
            Classification::Application => Ok(Outcome::Delivered {
                forwarded: self.forward(&message),
            }),
        }
    }

    /// Capture the assigned ids and, on first contact, re-announce with
    /// `resend = false`. Both happen under the gate so no send can observe
    /// the ids without the matching announcement.
    fn bind(&self, ids: &AssignedIds) -> bool {
        self.gate.exclusive(|| {
            let first_contact = self.gate.with_identity_mut(|identity| identity.bind(ids));
            if first_contact {
                info!(
                    "Broker found: party_id({}) group_id({})",
                    ids.party_id, ids.group_id
                );
                if let Err(e) = self.announcer.announce(false) {
                    warn!("Re-announcement after handshake failed: {e}");
                }
            } else {
                debug!(
                    "Identity re-confirmed: party_id({}) group_id({})",
                    ids.party_id, ids.group_id
                );
            }
            first_contact
        })
    }

    fn forward(&self, message: &InboundMessage<'_>) -> bool {
        // Clone out of the lock so the handler may replace itself.
        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            return false;
        };
        match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
            Ok(()) => true,
            Err(payload) => {
                warn!("Inbound handler panicked: {}", panic_message(&*payload));
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ConnectionState, ModuleIdentity};
    use crate::transport::MemoryTransport;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Fixture {
        dispatcher: InboundDispatcher,
        gate: Arc<SendGate>,
        transport: Arc<MemoryTransport>,
        received: Arc<Mutex<Vec<Value>>>,
    }

    fn fixture() -> Fixture {
        let identity = ModuleIdentity::new("gen", "123456789012", "", "0.0.1", Vec::new());
        let gate = Arc::new(SendGate::new(identity));
        let transport = Arc::new(MemoryTransport::new());
        gate.attach(transport.clone());
        let dispatcher =
            InboundDispatcher::new(Arc::clone(&gate), IdentityAnnouncer::new(Arc::clone(&gate)));

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        dispatcher.set_handler(Arc::new(move |msg: &InboundMessage<'_>| {
            sink.lock().push(msg.json.clone());
        }));

        Fixture {
            dispatcher,
            gate,
            transport,
            received,
        }
    }

    fn confirmation(party: &str, group: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ty": "uv",
            "mt": 9100,
            "ms": {"f": {"sd": party, "gr": group}}
        }))
        .unwrap()
    }

    #[test]
    fn test_classify_requires_envelope_fields() {
        assert_eq!(
            classify(&json!({"ty": "g"})),
            Err(InboundError::MissingField("mt"))
        );
        assert_eq!(
            classify(&json!({"mt": 1})),
            Err(InboundError::MissingField("ty"))
        );
        assert_eq!(
            classify(&json!({"mt": 9100, "ty": "uv"})),
            Err(InboundError::MissingField("ms"))
        );
    }

    #[test]
    fn test_classify_routes() {
        assert_eq!(
            classify(&json!({"mt": 9100, "ty": "g", "ms": {}})),
            Ok(Classification::Application)
        );
        assert_eq!(
            classify(&json!({"mt": 9999, "ty": "uv", "ms": {}})),
            Ok(Classification::Probe)
        );
        assert_eq!(
            classify(&json!({"mt": 1005, "ty": "uv", "ms": {"C": 1004}})),
            Ok(Classification::Application)
        );
        assert!(matches!(
            classify(&json!({"mt": 9100, "ty": "uv", "ms": {"f": {"sd": "P1"}}})),
            Err(InboundError::ProtocolViolation(_))
        ));
        assert!(matches!(
            classify(&json!({"mt": 9100, "ty": "uv", "ms": {}})),
            Err(InboundError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_first_confirmation_binds_and_reannounces() {
        let fx = fixture();
        let outcome = fx.dispatcher.process(&confirmation("P1", "G1")).unwrap();
        assert_eq!(
            outcome,
            Outcome::Confirmed {
                first_contact: true,
                forwarded: true
            }
        );

        fx.gate.with_identity(|identity| {
            assert_eq!(identity.state(), ConnectionState::Bound);
            assert_eq!(identity.party_id(), "P1");
            assert_eq!(identity.group_id(), "G1");
        });

        let payloads = fx.transport.identity_payloads();
        assert_eq!(payloads.len(), 1);
        let value: Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(value["ms"]["z"], false);
        assert_eq!(fx.received.lock().len(), 1);
    }

    #[test]
    fn test_second_confirmation_updates_without_reannounce() {
        let fx = fixture();
        fx.dispatcher.receive(&confirmation("P1", "G1"));
        let outcome = fx.dispatcher.process(&confirmation("P2", "G2")).unwrap();
        assert_eq!(
            outcome,
            Outcome::Confirmed {
                first_contact: false,
                forwarded: true
            }
        );

        assert_eq!(fx.transport.identity_payloads().len(), 1);
        fx.gate.with_identity(|identity| {
            assert_eq!(identity.party_id(), "P2");
            assert_eq!(identity.group_id(), "G2");
        });
        assert_eq!(fx.received.lock().len(), 2);
    }

    #[test]
    fn test_malformed_frames_change_nothing() {
        let fx = fixture();
        fx.dispatcher.receive(b"\x00\x01 not json");
        fx.dispatcher.receive(br#"{"ty": "uv", "ms": {}}"#);
        fx.dispatcher.receive(br#"{"mt": 9100, "ms": {"f": {"sd": "P", "gr": "G"}}}"#);
        fx.dispatcher.receive(br#"{"mt": 9100, "ty": "uv", "ms": {"f": {"gr": "G"}}}"#);

        assert!(fx.received.lock().is_empty());
        assert!(fx.transport.identity_payloads().is_empty());
        fx.gate.with_identity(|identity| {
            assert_eq!(identity.state(), ConnectionState::Unbound);
            assert!(identity.party_id().is_empty());
        });
    }

    #[test]
    fn test_probe_is_not_forwarded() {
        let fx = fixture();
        let outcome = fx
            .dispatcher
            .process(br#"{"mt": 9999, "ty": "uv", "ms": {}}"#)
            .unwrap();
        assert_eq!(outcome, Outcome::Probe);
        assert!(fx.received.lock().is_empty());
    }

    #[test]
    fn test_application_messages_forwarded() {
        let fx = fixture();
        fx.dispatcher.receive(br#"{"mt": 1008, "ty": "g", "ms": {"DS": "x"}}"#);
        fx.dispatcher.receive(br#"{"mt": 1008, "ty": "i", "tg": "me"}"#);
        fx.dispatcher.receive(br#"{"mt": 1005, "ty": "uv", "ms": {"C": 1004}}"#);
        fx.dispatcher.receive(br#"{"mt": "custom", "ty": "zz"}"#);
        assert_eq!(fx.received.lock().len(), 4);
    }

    #[test]
    fn test_no_handler_still_binds() {
        let fx = fixture();
        fx.dispatcher.clear_handler();
        assert!(!fx.dispatcher.has_handler());
        let outcome = fx.dispatcher.process(&confirmation("P1", "G1")).unwrap();
        assert_eq!(
            outcome,
            Outcome::Confirmed {
                first_contact: true,
                forwarded: false
            }
        );
    }

    #[test]
    fn test_handler_sees_trailing_bytes() {
        let fx = fixture();
        let trailing = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&trailing);
        fx.dispatcher.set_handler(Arc::new(move |msg: &InboundMessage<'_>| {
            *sink.lock() = msg.trailing.map(<[u8]>::to_vec);
        }));

        let mut frame = br#"{"mt": 1006, "ty": "g", "ms": {}}"#.to_vec();
        frame.push(0);
        frame.extend_from_slice(&[9, 8, 7]);
        fx.dispatcher.receive(&frame);

        assert_eq!(trailing.lock().as_deref(), Some(&[9u8, 8, 7][..]));
    }

    #[test]
    fn test_handler_may_send() {
        let fx = fixture();
        let gate = Arc::clone(&fx.gate);
        fx.dispatcher.set_handler(Arc::new(move |_msg: &InboundMessage<'_>| {
            gate.send_json("", json!({"ack": true}), MessageType::Code(80001), false)
                .unwrap();
        }));
        fx.dispatcher.receive(&confirmation("P1", "G1"));
        assert_eq!(fx.transport.sent().len(), 1);
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let fx = fixture();
        fx.dispatcher
            .receive(br#"{"ty": "uv", "mt": 9100, "ms": {"f": {"sd": 17, "gr": 3}}}"#);
        fx.gate.with_identity(|identity| {
            assert_eq!(identity.state(), ConnectionState::Bound);
            assert_eq!(identity.party_id(), "17");
            assert_eq!(identity.group_id(), "3");
        });
    }

    #[test]
    fn test_non_scalar_ids_are_rejected() {
        assert!(matches!(
            classify(&json!({"mt": 9100, "ty": "uv", "ms": {"f": {"sd": ["P"], "gr": "G"}}})),
            Err(InboundError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let fx = fixture();
        fx.dispatcher.set_handler(Arc::new(|_msg: &InboundMessage<'_>| panic!("handler bug")));
        let outcome = fx
            .dispatcher
            .process(br#"{"ty": "g", "mt": 1008, "ms": {}}"#)
            .unwrap();
        assert_eq!(outcome, Outcome::Delivered { forwarded: false });

        let outcome = fx.dispatcher.process(&confirmation("P1", "G1")).unwrap();
        assert_eq!(
            outcome,
            Outcome::Confirmed {
                first_contact: true,
                forwarded: false
            }
        );
        fx.gate.with_identity(|identity| assert_eq!(identity.party_id(), "P1"));
    }

    #[test]
    fn test_inbound_message_accessors() {
        let json = json!({"mt": 1005, "ty": "uv", "ms": {"C": 1004}});
        let raw = serde_json::to_vec(&json).unwrap();
        let msg = InboundMessage {
            raw: &raw,
            json: &json,
            trailing: None,
        };
        assert_eq!(msg.len(), raw.len());
        assert_eq!(msg.message_type(), Some(MessageType::REMOTE_EXECUTE));
        assert_eq!(msg.routing_type(), Some(RoutingType::InterModule));
        assert!(matches!(msg.command(), Command::RemoteExecute(_)));
    }
}
