//! Protocol errors surfaced by the codecs.

use thiserror::Error;

/// Errors raised while encoding or decoding wire data.
///
/// Decode-side errors are non-fatal to a session: the offending frame is
/// dropped and decoding continues with the next one.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Leading type character is not a known Engine.IO or Socket.IO code.
    #[error("Invalid packet type: {0:?}")]
    InvalidPacketType(char),

    /// A v3 polling payload carried a bad decimal length prefix.
    #[error("Malformed length prefix: {0:?}")]
    MalformedLength(String),

    /// JSON body failed to parse or serialize.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 attachment body failed to decode.
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Placeholder/binary-count mismatch or otherwise inconsistent payload.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A binary frame arrived with no packet waiting for attachments.
    #[error("Orphan binary frame")]
    OrphanBinary,

    /// Packet header chain could not be parsed.
    #[error("Malformed packet header: {0}")]
    MalformedHeader(String),
}
