//! Engine.IO layer: versions, handshake, and the outer packet framing.
//!
//! Engine.IO is the transport-negotiation protocol Socket.IO rides on. Each
//! text unit starts with a single type digit; the `Open` packet carries the
//! handshake JSON, `Message` wraps a Socket.IO packet.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

/// Wire-format generation, fixed once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineIoVersion {
    /// Engine.IO protocol 3 (Socket.IO 2.x servers).
    V3,
    /// Engine.IO protocol 4 (Socket.IO 3.x/4.x servers).
    #[default]
    V4,
}

impl EngineIoVersion {
    /// The value of the `EIO` query parameter.
    #[must_use]
    pub fn as_query(&self) -> &'static str {
        match self {
            EngineIoVersion::V3 => "3",
            EngineIoVersion::V4 => "4",
        }
    }
}

impl fmt::Display for EngineIoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_query())
    }
}

/// Handshake data carried by the `Open` packet.
///
/// All keepalive timing for the session comes from here, never from
/// hard-coded constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Server-assigned session id.
    pub sid: String,
    /// Transports the server is willing to upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between client pings, in milliseconds.
    #[serde(rename = "pingInterval")]
    pub ping_interval: u64,
    /// Deadline for the matching pong, in milliseconds.
    #[serde(rename = "pingTimeout")]
    pub ping_timeout: u64,
}

impl Handshake {
    /// Whether the server advertises an upgrade to the given transport.
    #[must_use]
    pub fn supports_upgrade(&self, transport: &str) -> bool {
        self.upgrades.iter().any(|u| u == transport)
    }
}

/// One Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Handshake response, first packet of every connection.
    Open(Handshake),
    /// Orderly shutdown of the Engine.IO connection.
    Close,
    /// Keepalive probe; carries "probe" during a transport upgrade.
    Ping(Option<String>),
    /// Keepalive answer.
    Pong(Option<String>),
    /// Carrier for a Socket.IO packet.
    Message(String),
    /// Commits a transport upgrade after a successful probe.
    Upgrade,
    /// Filler packet flushed into a stale polling cycle.
    Noop,
}

impl EnginePacket {
    /// Parse one text unit.
    ///
    /// A unit whose leading character is not a known type digit is treated as
    /// a bare `Message` payload, matching the lenient decode of deployed
    /// servers.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit is empty or the `Open` handshake JSON is
    /// invalid.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let Some(first) = text.chars().next() else {
            return Err(ProtocolError::MalformedPayload("empty engine packet".into()));
        };
        let rest = &text[first.len_utf8()..];

        match first {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(non_empty(rest))),
            '3' => Ok(EnginePacket::Pong(non_empty(rest))),
            '4' => Ok(EnginePacket::Message(rest.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            _ => Ok(EnginePacket::Message(text.to_string())),
        }
    }

    /// Encode to the text unit sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake JSON fails to serialize.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(match self {
            EnginePacket::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(payload) => prefixed('2', payload),
            EnginePacket::Pong(payload) => prefixed('3', payload),
            EnginePacket::Message(body) => format!("4{body}"),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn prefixed(code: char, payload: &Option<String>) -> String {
    match payload {
        Some(p) => format!("{code}{p}"),
        None => code.to_string(),
    }
}
