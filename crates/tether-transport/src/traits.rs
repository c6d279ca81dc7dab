//! Transport abstraction for the tether client.
//!
//! The session drives exactly one [`Transport`] at a time and is otherwise
//! transport-agnostic. Two kinds satisfy the contract: a persistent socket
//! (1:1 frame/message mapping) and a repeated-request polling stream that
//! assembles frames per the protocol's polling framing.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

use crate::url::ConnectionUrl;

/// One unit exchanged with a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Binary(Bytes),
}

/// The two transport families of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Repeated HTTP request/response polling.
    Polling,
    /// Persistent websocket stream.
    Websocket,
}

impl TransportKind {
    /// Value of the `transport` query parameter, also the upgrade name the
    /// server advertises in its handshake.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Polling => "polling",
            TransportKind::Websocket => "websocket",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// A client-side duplex byte-stream transport.
///
/// Implementations preserve call order on the wire for `send` and deliver
/// inbound frames in arrival order from `recv`.
#[async_trait]
pub trait Transport: Send {
    /// Open the duplex channel; resolves once frames can flow or fails.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Send one frame, resolving once it is accepted for transmission.
    async fn send(&mut self, frame: TransportFrame) -> Result<(), TransportError>;

    /// Receive the next inbound frame.
    ///
    /// Returns `None` when the peer closed the channel cleanly.
    async fn recv(&mut self) -> Result<Option<TransportFrame>, TransportError>;

    /// Shut the channel down in an orderly fashion. Idempotent.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// The transport family this implementation belongs to.
    fn kind(&self) -> TransportKind;
}

/// Opens transports for the session.
///
/// The session uses the factory for initial selection (explicit kind or the
/// best supported one) and again when upgrading from polling to websocket
/// mid-handshake.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Whether this factory can open the given transport kind.
    fn supports(&self, kind: TransportKind) -> bool;

    /// Open an unconnected transport for the given URL.
    ///
    /// `sid` carries the Engine.IO session id when rejoining an already
    /// handshaken session, as the upgrade probe does.
    async fn open(
        &self,
        kind: TransportKind,
        url: &ConnectionUrl,
        sid: Option<&str>,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_query_names() {
        assert_eq!(TransportKind::Polling.as_str(), "polling");
        assert_eq!(TransportKind::Websocket.to_string(), "websocket");
    }
}
