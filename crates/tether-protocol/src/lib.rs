//! # tether-protocol
//!
//! Wire protocol codecs for the tether Socket.IO client.
//!
//! This crate translates between raw transport frames and an in-memory
//! packet model for both wire-format generations (Engine.IO v3 and v4):
//!
//! - [`value`] / [`attachments`] - generic value tree plus the binary
//!   placeholder substitution that lets byte buffers travel alongside JSON
//! - [`engine`] - Engine.IO packets and the handshake
//! - [`packet`] - Socket.IO packets (namespaces, correlation ids, events)
//! - [`payload`] - polling payload framing and websocket binary marking
//! - [`decoder`] - stateful decoder collecting multi-frame binary packets
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{Packet, Value};
//!
//! let packet = Packet::event("/chat", "message", vec![Value::from("hi")], None);
//! let text = packet.serialize().unwrap();
//! assert_eq!(text, "2/chat,[\"message\",\"hi\"]");
//! ```

pub mod attachments;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod packet;
pub mod payload;
pub mod value;

pub use decoder::{encode_socket, Decoder, Incoming};
pub use engine::{EngineIoVersion, EnginePacket, Handshake};
pub use error::ProtocolError;
pub use packet::{Packet, PacketKind};
pub use payload::RawUnit;
pub use value::Value;
