//! Transport configuration for a fleet module.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ModuleError;

/// Default largest chunk payload per datagram.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 8192;

/// Default number of frames the transport queues before refusing sends.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 1024;

fn default_send_queue_capacity() -> usize {
    DEFAULT_SEND_QUEUE_CAPACITY
}

/// Configuration for the UDP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Address of the broker (communicator) datagrams are sent to.
    #[serde(with = "socket_addr_serde")]
    pub broker_addr: SocketAddr,

    /// Local address to bind and receive on.
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,

    /// Largest chunk payload per datagram. Larger frames are split.
    pub max_datagram_size: usize,

    /// Interval between re-transmissions of the standing identity.
    #[serde(with = "duration_secs_serde")]
    pub announce_interval: Duration,

    /// Pause between consecutive chunks of one frame.
    #[serde(with = "duration_millis_serde")]
    pub chunk_delay: Duration,

    /// Receive buffer size. Must hold one chunk plus its 2-byte header.
    pub recv_buffer_size: usize,

    /// Frames queued for sending before `send` reports a full queue.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            broker_addr: SocketAddr::from(([127, 0, 0, 1], 60000)),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 61111)),
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            announce_interval: Duration::from_secs(1),
            chunk_delay: Duration::from_millis(10),
            recv_buffer_size: 65536,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
        }
    }
}

impl ModuleConfig {
    /// Save the config to a JSON file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ModuleError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ModuleError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file, or return defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(data) => match serde_json::from_str::<ModuleConfig>(&data) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Corrupt config file, using defaults: {e}");
                    }
                },
                Err(e) => {
                    tracing::warn!("Cannot read config file, using defaults: {e}");
                }
            }
        }
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

mod duration_secs_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
