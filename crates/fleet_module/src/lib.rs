//! Fleet Module: identity and routing layer for modules attached to a
//! fleet broker.
//!
//! A module announces who it is (class, id, features, hardware) to the
//! broker over a datagram transport, waits for the broker to assign party
//! and group ids, and from then on exchanges routed JSON or hybrid
//! JSON-plus-binary messages with other units.
//!
//! # Architecture
//!
//! - **Identity**: [`ModuleIdentity`] holds the static description and the
//!   broker-assigned ids.
//! - **Protocol**: [`Envelope`] with short wire keys, routed by
//!   [`RoutingType`]; [`codec`] builds text and hybrid frames.
//! - **Gate**: [`gate::SendGate`] serializes every construct-and-send.
//! - **Handshake**: [`dispatcher::InboundDispatcher`] binds the identity on
//!   the broker's confirmation and forwards everything else.
//! - **Transport**: [`UdpTransport`] chunks frames over UDP;
//!   [`MemoryTransport`] records frames for tests.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use fleet_module::{ModuleClient, ModuleConfig, ModuleIdentity, UdpTransport};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = ModuleIdentity::new("gen", "123456789012", "", "0.0.1", Vec::new());
//! let client = ModuleClient::new(identity);
//! let transport = Arc::new(UdpTransport::bind(ModuleConfig::default(), client.receive_callback()).await?);
//! transport.start()?;
//! client.attach(transport.clone())?;
//! client.on_message(|msg| println!("{} bytes", msg.len()));
//! # Ok(())
//! # }
//! ```

pub mod announcer;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod gate;
pub mod identity;
pub mod logging;
pub mod message;
pub mod protocol;
pub mod transport;
pub mod udp;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use client::ModuleClient;
pub use config::ModuleConfig;
pub use dispatcher::InboundMessage;
pub use error::{InboundError, ModuleError, TransportError};
pub use facade::Facade;
pub use identity::{ConnectionState, HardwareType, ModuleIdentity};
pub use message::{Envelope, MessageType, RoutingType};
pub use transport::{MemoryTransport, Transport};
pub use udp::UdpTransport;
