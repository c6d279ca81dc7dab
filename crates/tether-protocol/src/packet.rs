//! Socket.IO packets: the namespace-multiplexed envelope inside an
//! Engine.IO Message.
//!
//! Header fields come in fixed order, each optional: attachment count
//! (`N-`, binary kinds only), namespace (`/nsp,`), correlation id (decimal
//! digits), JSON body. An Event body is a JSON array whose first element is
//! the event name.

use bytes::Bytes;
use std::fmt;

use crate::attachments;
use crate::error::ProtocolError;
use crate::value::Value;

/// Socket.IO packet type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl PacketKind {
    fn from_digit(c: char) -> Option<Self> {
        match c {
            '0' => Some(PacketKind::Connect),
            '1' => Some(PacketKind::Disconnect),
            '2' => Some(PacketKind::Event),
            '3' => Some(PacketKind::Ack),
            '4' => Some(PacketKind::ConnectError),
            '5' => Some(PacketKind::BinaryEvent),
            '6' => Some(PacketKind::BinaryAck),
            _ => None,
        }
    }

    /// Whether this kind announces binary attachments in its header.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, PacketKind::BinaryEvent | PacketKind::BinaryAck)
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// A decoded (or to-be-encoded) Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    /// Target namespace, default "/". On a v3 wire the namespace's query
    /// string rides inside this token (`"/chat?token=abc"`).
    pub nsp: String,
    /// Correlation id for ack matching.
    pub id: Option<u64>,
    /// JSON body with placeholders already substituted for binary kinds.
    pub data: Option<serde_json::Value>,
    /// Attachment count announced in the header.
    pub attachments_expected: usize,
    /// Attachments collected so far, in placeholder order.
    pub attachments: Vec<Bytes>,
}

impl Packet {
    fn new(kind: PacketKind, nsp: impl Into<String>) -> Self {
        Self {
            kind,
            nsp: nsp.into(),
            id: None,
            data: None,
            attachments_expected: 0,
            attachments: Vec::new(),
        }
    }

    /// Build a Connect packet, with the v4 auth payload when given.
    #[must_use]
    pub fn connect(nsp: impl Into<String>, auth: Option<serde_json::Value>) -> Self {
        let mut packet = Self::new(PacketKind::Connect, nsp);
        packet.data = auth;
        packet
    }

    /// Build a Disconnect packet for a namespace.
    #[must_use]
    pub fn disconnect(nsp: impl Into<String>) -> Self {
        Self::new(PacketKind::Disconnect, nsp)
    }

    /// Build an Event packet, selecting `BinaryEvent` automatically when the
    /// arguments carry byte buffers.
    #[must_use]
    pub fn event(
        nsp: impl Into<String>,
        event: impl Into<String>,
        args: Vec<Value>,
        id: Option<u64>,
    ) -> Self {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(Value::String(event.into()));
        full_args.extend(args);

        let (tree, collected) = attachments::deconstruct(&full_args);
        let kind = if collected.is_empty() {
            PacketKind::Event
        } else {
            PacketKind::BinaryEvent
        };

        let mut packet = Self::new(kind, nsp);
        packet.id = id;
        packet.data = Some(tree);
        packet.attachments_expected = collected.len();
        packet.attachments = collected;
        packet
    }

    /// Build an Ack reply, selecting `BinaryAck` when the arguments carry
    /// byte buffers.
    #[must_use]
    pub fn ack(nsp: impl Into<String>, id: u64, args: Vec<Value>) -> Self {
        let (tree, collected) = attachments::deconstruct(&args);
        let kind = if collected.is_empty() {
            PacketKind::Ack
        } else {
            PacketKind::BinaryAck
        };

        let mut packet = Self::new(kind, nsp);
        packet.id = Some(id);
        packet.data = Some(tree);
        packet.attachments_expected = collected.len();
        packet.attachments = collected;
        packet
    }

    /// Whether every announced attachment has been collected.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.attachments.len() == self.attachments_expected
    }

    /// Append one collected binary attachment.
    pub fn push_attachment(&mut self, data: Bytes) {
        self.attachments.push(data);
    }

    /// Extract `(event name, arguments)` from an Event/BinaryEvent body,
    /// resolving placeholders against the collected attachments.
    ///
    /// # Errors
    ///
    /// Fails with `MalformedPayload` if attachments are still pending, the
    /// body is not an array, or the first element is not a string.
    pub fn event_args(&self) -> Result<(String, Vec<Value>), ProtocolError> {
        let mut values = self.resolved_args()?;
        if values.is_empty() {
            return Err(ProtocolError::MalformedPayload(
                "event body without a name".into(),
            ));
        }
        let name = match values.remove(0) {
            Value::String(name) => name,
            other => {
                return Err(ProtocolError::MalformedPayload(format!(
                    "event name is not a string: {other:?}"
                )))
            }
        };
        Ok((name, values))
    }

    /// Extract the argument list of an Ack/BinaryAck body.
    ///
    /// # Errors
    ///
    /// Fails with `MalformedPayload` if attachments are still pending or the
    /// body is not an array.
    pub fn ack_args(&self) -> Result<Vec<Value>, ProtocolError> {
        self.resolved_args()
    }

    fn resolved_args(&self) -> Result<Vec<Value>, ProtocolError> {
        if !self.is_complete() {
            return Err(ProtocolError::MalformedPayload(format!(
                "packet dispatched with {}/{} attachments",
                self.attachments.len(),
                self.attachments_expected
            )));
        }
        match &self.data {
            Some(tree) => attachments::reconstruct(tree, &self.attachments),
            None => Ok(Vec::new()),
        }
    }

    /// Parse the header chain of a Socket.IO packet text (the Engine.IO
    /// Message marker already stripped).
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown type digit, malformed attachment
    /// count, or invalid JSON body.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let type_char = text
            .chars()
            .next()
            .ok_or_else(|| ProtocolError::MalformedHeader("empty packet".into()))?;
        let kind = PacketKind::from_digit(type_char)
            .ok_or(ProtocolError::InvalidPacketType(type_char))?;

        let mut rest = &text[type_char.len_utf8()..];

        // Attachment count: "<N>-" for binary kinds.
        let mut attachments_expected = 0;
        if kind.is_binary() {
            let dash = rest
                .find('-')
                .ok_or_else(|| ProtocolError::MalformedHeader(text.to_string()))?;
            attachments_expected = rest[..dash]
                .parse()
                .map_err(|_| ProtocolError::MalformedHeader(text.to_string()))?;
            rest = &rest[dash + 1..];
        }

        // Namespace: "/nsp," (comma optional at end of packet).
        let mut nsp = String::from("/");
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(comma) => {
                    nsp = rest[..comma].to_string();
                    rest = &rest[comma + 1..];
                }
                None => {
                    nsp = rest.to_string();
                    rest = "";
                }
            }
        }

        // Correlation id: leading decimal digits.
        let id_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let id = if id_end > 0 {
            Some(
                rest[..id_end]
                    .parse()
                    .map_err(|_| ProtocolError::MalformedHeader(text.to_string()))?,
            )
        } else {
            None
        };
        rest = &rest[id_end..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(Self {
            kind,
            nsp,
            id,
            data,
            attachments_expected,
            attachments: Vec::new(),
        })
    }

    /// Serialize the header chain and body (without the Engine.IO Message
    /// marker) for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the body fails to serialize.
    pub fn serialize(&self) -> Result<String, ProtocolError> {
        let mut out = self.kind.to_string();

        if self.kind.is_binary() {
            out.push_str(&format!("{}-", self.attachments_expected));
        }

        if self.nsp != "/" {
            out.push_str(&self.nsp);
            out.push(',');
        }

        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }

        if let Some(data) = &self.data {
            out.push_str(&serde_json::to_string(data)?);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_with_namespace_and_id() {
        let packet = Packet::parse("2/test,3[\"hi\",\"x\"]").unwrap();
        assert_eq!(packet.kind, PacketKind::Event);
        assert_eq!(packet.nsp, "/test");
        assert_eq!(packet.id, Some(3));

        let (name, args) = packet.event_args().unwrap();
        assert_eq!(name, "hi");
        assert_eq!(args, vec![Value::from("x")]);
    }

    #[test]
    fn test_parse_root_namespace_event() {
        let packet = Packet::parse("2[\"ping\"]").unwrap();
        assert_eq!(packet.nsp, "/");
        assert_eq!(packet.id, None);
        let (name, args) = packet.event_args().unwrap();
        assert_eq!(name, "ping");
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_v3_namespace_query_token() {
        // v3 appends the namespace query to the namespace token itself.
        let packet = Packet::parse("0/test?token=eio3,").unwrap();
        assert_eq!(packet.kind, PacketKind::Connect);
        assert_eq!(packet.nsp, "/test?token=eio3");
    }

    #[test]
    fn test_parse_binary_event_header() {
        let packet = Packet::parse("51-/files,7[\"chunk\",{\"_placeholder\":true,\"num\":0}]")
            .unwrap();
        assert_eq!(packet.kind, PacketKind::BinaryEvent);
        assert_eq!(packet.attachments_expected, 1);
        assert_eq!(packet.nsp, "/files");
        assert_eq!(packet.id, Some(7));
        assert!(!packet.is_complete());
    }

    #[test]
    fn test_binary_event_resolves_after_attachments() {
        let mut packet =
            Packet::parse("51-[\"chunk\",{\"_placeholder\":true,\"num\":0}]").unwrap();
        assert!(packet.event_args().is_err());

        packet.push_attachment(Bytes::from_static(&[1, 2, 3]));
        let (name, args) = packet.event_args().unwrap();
        assert_eq!(name, "chunk");
        assert_eq!(args, vec![Value::Binary(Bytes::from_static(&[1, 2, 3]))]);
    }

    #[test]
    fn test_event_constructor_selects_binary_kind() {
        let plain = Packet::event("/", "msg", vec![Value::from("x")], None);
        assert_eq!(plain.kind, PacketKind::Event);
        assert_eq!(plain.attachments_expected, 0);

        let binary = Packet::event("/", "msg", vec![Value::from(vec![1u8])], Some(4));
        assert_eq!(binary.kind, PacketKind::BinaryEvent);
        assert_eq!(binary.attachments_expected, 1);
        assert!(binary.serialize().unwrap().starts_with("51-"));
    }

    #[test]
    fn test_serialize_parse_roundtrip() {
        let packets = vec![
            Packet::connect("/", None),
            Packet::connect("/admin", Some(serde_json::json!({"token": "t"}))),
            Packet::disconnect("/admin"),
            Packet::event("/test", "hi", vec![Value::from("x")], Some(3)),
            Packet::ack("/", 9, vec![Value::from(true)]),
        ];

        for packet in packets {
            let text = packet.serialize().unwrap();
            let parsed = Packet::parse(&text).unwrap();
            assert_eq!(parsed.kind, packet.kind);
            assert_eq!(parsed.nsp, packet.nsp);
            assert_eq!(parsed.id, packet.id);
            assert_eq!(parsed.data, packet.data);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(matches!(
            Packet::parse("9[\"x\"]"),
            Err(ProtocolError::InvalidPacketType('9'))
        ));
    }
}
