//! Protocol constants shared with the broker.
//!
//! Field keys are short on purpose: every envelope travels in a single
//! datagram whenever possible.

// ── Envelope keys ──────────────────────────────────────────────────────

/// Sender's module key.
pub const KEY_MODULE_KEY: &str = "GU";
/// Destination identifier (empty for group broadcast).
pub const KEY_TARGET_ID: &str = "tg";
/// Routing type tag.
pub const KEY_ROUTING_TYPE: &str = "ty";
/// Message type tag.
pub const KEY_MESSAGE_TYPE: &str = "mt";
/// Command payload.
pub const KEY_COMMAND: &str = "ms";

// ── Identity command keys ──────────────────────────────────────────────

pub const ID_MODULE_ID: &str = "a";
pub const ID_MODULE_CLASS: &str = "b";
pub const ID_MESSAGE_FILTER: &str = "c";
pub const ID_FEATURES: &str = "d";
pub const ID_MODULE_KEY: &str = "e";
pub const ID_HARDWARE_SERIAL: &str = "s";
pub const ID_HARDWARE_TYPE: &str = "t";
pub const ID_VERSION: &str = "v";
pub const ID_INSTANCE_TIMESTAMP: &str = "u";
pub const ID_RESEND: &str = "z";

// ── Identity confirmation keys ─────────────────────────────────────────

/// Sub-object of a confirmation command holding the assigned ids.
pub const CONFIRM_IDENTITY: &str = "f";
/// Party id assigned by the broker.
pub const CONFIRM_SENDER: &str = "sd";
/// Group id assigned by the broker.
pub const CONFIRM_GROUP: &str = "gr";

// ── Routing tags ───────────────────────────────────────────────────────

pub const ROUTE_GROUP: &str = "g";
pub const ROUTE_INDIVIDUAL: &str = "i";
pub const ROUTE_INTERMODULE: &str = "uv";
pub const ROUTE_SYSTEM: &str = "s";

// ── Reserved targets ───────────────────────────────────────────────────

pub const TARGET_ALL_GCS: &str = "_GCS_";
pub const TARGET_ALL_AGENTS: &str = "_AGN_";
pub const TARGET_ALL: &str = "_GD_";
pub const TARGET_SYSTEM: &str = "_SYS_";

// ── Message type codes ─────────────────────────────────────────────────

pub const TYPE_UNIT_ID: i64 = 1004;
pub const TYPE_REMOTE_EXECUTE: i64 = 1005;
pub const TYPE_ERROR: i64 = 1008;
pub const TYPE_MODULE_IDENTITY: i64 = 9100;
pub const TYPE_MODULE_REMOTE_EXECUTE: i64 = 9101;
pub const TYPE_DUMMY: i64 = 9999;

// ── Module classes ─────────────────────────────────────────────────────

pub const CLASS_COMM: &str = "comm";
pub const CLASS_FCB: &str = "fcb";
pub const CLASS_VIDEO: &str = "camera";
pub const CLASS_P2P: &str = "p2p";
pub const CLASS_GENERIC: &str = "gen";

// ── Feature codes ──────────────────────────────────────────────────────

pub const FEATURE_RECEIVING_TELEMETRY: &str = "R";
pub const FEATURE_SENDING_TELEMETRY: &str = "T";
pub const FEATURE_CAPTURE_IMAGE: &str = "C";
pub const FEATURE_CAPTURE_VIDEO: &str = "V";

// ── Notifications ──────────────────────────────────────────────────────

pub const NOTIFICATION_EMERGENCY: u8 = 0;
pub const NOTIFICATION_ALERT: u8 = 1;
pub const NOTIFICATION_CRITICAL: u8 = 2;
pub const NOTIFICATION_ERROR: u8 = 3;
pub const NOTIFICATION_WARNING: u8 = 4;
pub const NOTIFICATION_NOTICE: u8 = 5;
pub const NOTIFICATION_INFO: u8 = 6;
pub const NOTIFICATION_DEBUG: u8 = 7;

pub const ERROR_USER_DEFINED: u32 = 1000;
