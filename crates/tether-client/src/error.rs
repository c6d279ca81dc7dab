//! Client error taxonomy.

use thiserror::Error;

/// Errors surfaced by the client.
///
/// Per-attempt connection failures are observable through the
/// `reconnect_attempt` event; `connect` itself returns a single aggregate
/// [`ClientError::ConnectionFailed`] only once the reconnection supervisor
/// has exhausted its budget (or reconnection is disabled).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed frame. Non-fatal at decode time: the frame is dropped and
    /// decoding continues.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),

    /// I/O failure on the transport; forces disconnection.
    #[error("Transport error: {0}")]
    Transport(#[from] tether_transport::TransportError),

    /// Handshake or attempt deadline exceeded.
    #[error("Connection attempt timed out")]
    Timeout,

    /// Server refused the namespace connection during handshake.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The reconnection supervisor ran out of attempts.
    #[error("Connection failed after {attempts} attempt(s): {source}")]
    ConnectionFailed {
        attempts: usize,
        #[source]
        source: Box<ClientError>,
    },

    /// Connect or reconnect was cancelled externally.
    #[error("Connection cancelled")]
    Cancelled,

    /// Operation requires a connected session.
    #[error("Client is not connected")]
    NotConnected,

    /// The peer did not acknowledge within the requested deadline.
    #[error("Acknowledgement timed out")]
    AckTimeout,
}
