//! Stateful frame decoder.
//!
//! Frames arrive from a transport one unit at a time. Text units parse as
//! Engine.IO packets (with Message unwrapping the nested Socket.IO packet);
//! a binary-kind packet announcing attachments is held back until every
//! announced binary unit has arrived, then released whole.

use bytes::Bytes;

use crate::engine::EnginePacket;
use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::payload::RawUnit;

/// A fully decoded inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Engine.IO control packet (Open, Ping, Pong, Close, ...).
    Engine(EnginePacket),
    /// Complete Socket.IO packet, attachments included.
    Socket(Packet),
}

/// Decoder state for one session.
///
/// Owns at most one packet waiting for binary continuations. Errors are
/// non-fatal: the decoder resets its pending state and the caller continues
/// with the next unit.
#[derive(Debug, Default)]
pub struct Decoder {
    pending: Option<Packet>,
}

impl Decoder {
    /// Create a fresh decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially collected packet, e.g. on reconnect.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Feed one unit; returns a packet once one is complete.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for malformed text, an orphan binary
    /// unit, or a text unit interrupting attachment collection. The decoder
    /// is left ready for the next unit.
    pub fn decode_unit(&mut self, unit: RawUnit) -> Result<Option<Incoming>, ProtocolError> {
        match unit {
            RawUnit::Text(text) => self.decode_text(&text),
            RawUnit::Binary(data) => self.decode_binary(data),
        }
    }

    fn decode_text(&mut self, text: &str) -> Result<Option<Incoming>, ProtocolError> {
        if self.pending.take().is_some() {
            return Err(ProtocolError::MalformedPayload(
                "text unit interrupted binary attachment collection".into(),
            ));
        }

        let engine = EnginePacket::parse(text)?;
        let EnginePacket::Message(body) = engine else {
            return Ok(Some(Incoming::Engine(engine)));
        };

        let packet = Packet::parse(&body)?;
        if packet.is_complete() {
            Ok(Some(Incoming::Socket(packet)))
        } else {
            self.pending = Some(packet);
            Ok(None)
        }
    }

    fn decode_binary(&mut self, data: Bytes) -> Result<Option<Incoming>, ProtocolError> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(ProtocolError::OrphanBinary);
        };

        pending.push_attachment(data);
        if pending.is_complete() {
            // Unwrap is fine: we just checked pending is Some.
            let packet = self.pending.take().unwrap();
            Ok(Some(Incoming::Socket(packet)))
        } else {
            Ok(None)
        }
    }
}

/// Encode a Socket.IO packet into its Engine.IO text unit plus the binary
/// attachment units that follow it on the wire.
///
/// # Errors
///
/// Returns an error if the JSON body fails to serialize.
pub fn encode_socket(packet: &Packet) -> Result<(String, Vec<Bytes>), ProtocolError> {
    let text = EnginePacket::Message(packet.serialize()?).encode()?;
    Ok((text, packet.attachments.clone()))
}
