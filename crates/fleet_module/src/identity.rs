//! Module identity: the self-description announced to the broker, and the
//! ids the broker hands back.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::message::{AssignedIds, MessageType};
use crate::protocol;

/// Kind of hardware identifier carried for broker-side verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HardwareType {
    #[default]
    Undefined,
    Cpu,
}

impl HardwareType {
    /// Numeric code used on the wire.
    pub fn code(&self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Cpu => 1,
        }
    }
}

/// Hardware descriptor. Opaque to this layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Hardware {
    pub serial: String,
    pub kind: HardwareType,
}

/// Whether the broker has answered our identity announcement yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No broker contact yet.
    #[default]
    Unbound,
    /// Party and group ids have been captured.
    Bound,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => write!(f, "unbound"),
            Self::Bound => write!(f, "bound"),
        }
    }
}

/// The full identity of this module.
///
/// `module_id`, `module_class` and `instance_timestamp` are fixed at
/// construction. `module_key`, `party_id` and `group_id` change only through
/// [`set_module_key`](Self::set_module_key) and [`bind`](Self::bind).
#[derive(Debug, Clone)]
pub struct ModuleIdentity {
    module_class: String,
    module_id: String,
    module_key: String,
    module_version: String,
    message_filter: Vec<MessageType>,
    features: Vec<String>,
    hardware: Hardware,
    extra_fields: Map<String, Value>,
    instance_timestamp: i64,
    party_id: String,
    group_id: String,
    state: ConnectionState,
}

impl ModuleIdentity {
    /// Define a module. Inputs are not validated; the broker decides what it
    /// accepts.
    pub fn new(
        module_class: impl Into<String>,
        module_id: impl Into<String>,
        module_key: impl Into<String>,
        module_version: impl Into<String>,
        message_filter: Vec<MessageType>,
    ) -> Self {
        Self {
            module_class: module_class.into(),
            module_id: module_id.into(),
            module_key: module_key.into(),
            module_version: module_version.into(),
            message_filter,
            features: Vec::new(),
            hardware: Hardware::default(),
            extra_fields: Map::new(),
            instance_timestamp: Utc::now().timestamp_millis(),
            party_id: String::new(),
            group_id: String::new(),
            state: ConnectionState::Unbound,
        }
    }

    /// Append a feature code. Duplicates are kept.
    pub fn add_feature(&mut self, code: impl Into<String>) {
        self.features.push(code.into());
    }

    pub fn set_hardware(&mut self, serial: impl Into<String>, kind: HardwareType) {
        self.hardware = Hardware {
            serial: serial.into(),
            kind,
        };
    }

    /// Insert or replace a pass-through field of the identity payload.
    pub fn append_extra_field(&mut self, name: impl Into<String>, value: Value) {
        self.extra_fields.insert(name.into(), value);
    }

    pub fn set_module_key(&mut self, module_key: impl Into<String>) {
        self.module_key = module_key.into();
    }

    /// Record the ids assigned by the broker. Returns `true` on first contact,
    /// i.e. when the state moved from `Unbound` to `Bound`.
    pub fn bind(&mut self, ids: &AssignedIds) -> bool {
        self.party_id = ids.party_id.clone();
        self.group_id = ids.group_id.clone();
        let first_contact = self.state == ConnectionState::Unbound;
        self.state = ConnectionState::Bound;
        first_contact
    }

    pub fn module_class(&self) -> &str {
        &self.module_class
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn module_key(&self) -> &str {
        &self.module_key
    }

    pub fn module_version(&self) -> &str {
        &self.module_version
    }

    pub fn message_filter(&self) -> &[MessageType] {
        &self.message_filter
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    pub fn extra_fields(&self) -> &Map<String, Value> {
        &self.extra_fields
    }

    pub fn instance_timestamp(&self) -> i64 {
        self.instance_timestamp
    }

    pub fn party_id(&self) -> &str {
        &self.party_id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Project the identity into the command of an announcement envelope.
    /// Extra fields are merged last and may shadow the fixed keys.
    pub fn announcement_command(&self, resend: bool) -> Value {
        let mut ms = Map::new();
        ms.insert(protocol::ID_MODULE_ID.into(), Value::from(self.module_id.as_str()));
        ms.insert(protocol::ID_MODULE_CLASS.into(), Value::from(self.module_class.as_str()));
        ms.insert(
            protocol::ID_MESSAGE_FILTER.into(),
            serde_json::to_value(&self.message_filter).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        ms.insert(protocol::ID_FEATURES.into(), Value::from(self.features.clone()));
        ms.insert(protocol::ID_MODULE_KEY.into(), Value::from(self.module_key.as_str()));
        ms.insert(
            protocol::ID_HARDWARE_SERIAL.into(),
            Value::from(self.hardware.serial.as_str()),
        );
        ms.insert(protocol::ID_HARDWARE_TYPE.into(), Value::from(self.hardware.kind.code()));
        ms.insert(protocol::ID_VERSION.into(), Value::from(self.module_version.as_str()));
        ms.insert(protocol::ID_RESEND.into(), Value::Bool(resend));
        ms.insert(
            protocol::ID_INSTANCE_TIMESTAMP.into(),
            Value::from(self.instance_timestamp),
        );

        for (name, value) in &self.extra_fields {
            ms.insert(name.clone(), value.clone());
        }

        Value::Object(ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
