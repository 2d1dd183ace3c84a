//! Envelope protocol: addressed JSON messages and the routing decision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol;

/// How the broker should route an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingType {
    /// Broadcast to every module sharing the sender's group.
    #[serde(rename = "g")]
    Group,
    /// Direct unicast to `target_id`.
    #[serde(rename = "i")]
    Individual,
    /// Control plane between this module and the broker.
    #[serde(rename = "uv")]
    InterModule,
    /// System message addressed to the broker itself.
    #[serde(rename = "s")]
    System,
}

impl RoutingType {
    /// Pick the routing type for an outgoing message.
    ///
    /// Control intent wins over addressing, and an explicit target wins over
    /// the group default. An internal message with a target is still
    /// [`RoutingType::InterModule`].
    pub fn select(target_id: &str, internal: bool) -> Self {
        if internal {
            Self::InterModule
        } else if !target_id.is_empty() {
            Self::Individual
        } else {
            Self::Group
        }
    }

    /// Wire tag for this routing type.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Group => protocol::ROUTE_GROUP,
            Self::Individual => protocol::ROUTE_INDIVIDUAL,
            Self::InterModule => protocol::ROUTE_INTERMODULE,
            Self::System => protocol::ROUTE_SYSTEM,
        }
    }

    /// Parse a wire tag. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            protocol::ROUTE_GROUP => Some(Self::Group),
            protocol::ROUTE_INDIVIDUAL => Some(Self::Individual),
            protocol::ROUTE_INTERMODULE => Some(Self::InterModule),
            protocol::ROUTE_SYSTEM => Some(Self::System),
            _ => None,
        }
    }
}

/// A message-type tag. The broker uses integer codes, but string tags are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageType {
    Code(i64),
    Name(String),
}

impl MessageType {
    pub const UNIT_ID: Self = Self::Code(protocol::TYPE_UNIT_ID);
    pub const REMOTE_EXECUTE: Self = Self::Code(protocol::TYPE_REMOTE_EXECUTE);
    pub const ERROR: Self = Self::Code(protocol::TYPE_ERROR);
    pub const MODULE_IDENTITY: Self = Self::Code(protocol::TYPE_MODULE_IDENTITY);
    pub const MODULE_REMOTE_EXECUTE: Self = Self::Code(protocol::TYPE_MODULE_REMOTE_EXECUTE);
    pub const DUMMY: Self = Self::Code(protocol::TYPE_DUMMY);

    /// Read a message type out of a parsed JSON value. Only integers and
    /// strings are valid tags.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Self::Code),
            serde_json::Value::String(s) => Some(Self::Name(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for MessageType {
    fn from(code: i64) -> Self {
        Self::Code(code)
    }
}

impl From<&str> for MessageType {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

/// One routable unit of application data.
///
/// `module_key` and `target_id` are omitted from the wire for the identity
/// announcement and system messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "GU", default, skip_serializing_if = "Option::is_none")]
    pub module_key: Option<String>,
    #[serde(rename = "tg", default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(rename = "ty")]
    pub routing_type: RoutingType,
    #[serde(rename = "mt")]
    pub message_type: MessageType,
    #[serde(rename = "ms", default)]
    pub command: serde_json::Value,
}

impl Envelope {
    /// An application envelope. The routing type follows
    /// [`RoutingType::select`].
    pub fn addressed(
        module_key: impl Into<String>,
        target_id: impl Into<String>,
        internal: bool,
        message_type: MessageType,
        command: serde_json::Value,
    ) -> Self {
        let target_id = target_id.into();
        Self {
            module_key: Some(module_key.into()),
            routing_type: RoutingType::select(&target_id, internal),
            target_id: Some(target_id),
            message_type,
            command,
        }
    }

    /// A bare control envelope with no key or target (identity announcement).
    pub fn control(message_type: MessageType, command: serde_json::Value) -> Self {
        Self {
            module_key: None,
            target_id: None,
            routing_type: RoutingType::InterModule,
            message_type,
            command,
        }
    }

    /// A system envelope addressed to the broker.
    pub fn system(message_type: MessageType, command: serde_json::Value) -> Self {
        Self {
            module_key: None,
            target_id: Some(protocol::TARGET_SYSTEM.to_string()),
            routing_type: RoutingType::System,
            message_type,
            command,
        }
    }

    /// Decode the command into its typed form.
    pub fn typed_command(&self) -> Command {
        Command::decode(&self.message_type, &self.command)
    }
}

// ---------------------------------------------------------------------------
// Typed commands
// ---------------------------------------------------------------------------

/// Party and group ids assigned by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedIds {
    #[serde(rename = "sd")]
    pub party_id: String,
    #[serde(rename = "gr")]
    pub group_id: String,
}

/// The broker's reply to an identity announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfirmation {
    #[serde(rename = "f")]
    pub ids: AssignedIds,
}

/// Ask the receiver to execute a numbered command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteExecute {
    #[serde(rename = "C")]
    pub command_type: i64,
}

/// Error or notification report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Error number.
    #[serde(rename = "EN")]
    pub error_number: u32,
    /// Component reporting the error.
    #[serde(rename = "IT")]
    pub info_type: u32,
    /// Severity, 0 (emergency) to 7 (debug).
    #[serde(rename = "NT")]
    pub notification_type: u8,
    #[serde(rename = "DS")]
    pub description: String,
}

/// A command decoded according to its message type.
///
/// Unknown message types, and known ones whose payload does not have the
/// expected shape, land in [`Command::Opaque`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    IdentityConfirmation(IdentityConfirmation),
    RemoteExecute(RemoteExecute),
    Error(ErrorReport),
    Opaque(serde_json::Value),
}

impl Command {
    pub fn decode(message_type: &MessageType, command: &serde_json::Value) -> Self {
        let typed = match message_type {
            MessageType::Code(protocol::TYPE_MODULE_IDENTITY) => {
                serde_json::from_value(command.clone()).map(Self::IdentityConfirmation).ok()
            }
            MessageType::Code(protocol::TYPE_REMOTE_EXECUTE)
            | MessageType::Code(protocol::TYPE_MODULE_REMOTE_EXECUTE) => {
                serde_json::from_value(command.clone()).map(Self::RemoteExecute).ok()
            }
            MessageType::Code(protocol::TYPE_ERROR) => {
                serde_json::from_value(command.clone()).map(Self::Error).ok()
            }
            _ => None,
        };
        typed.unwrap_or_else(|| Self::Opaque(command.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
