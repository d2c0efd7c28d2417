//! Packet model for the realtime channel.
//!
//! A packet is a string type tag plus an opaque payload. Only the session
//! layer interprets payloads, and only for the kinds it knows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Packet type tags.
///
/// Unknown tags survive decoding as [`PacketKind::Other`] so that a newer
/// client never breaks an older server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PacketKind {
    Ready,
    Message,
    Broadcast,
    Heartbeat,
    HeartbeatAck,
    Ack,
    Error,
    Other(String),
}

impl PacketKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ready => "ready",
            Self::Message => "message",
            Self::Broadcast => "broadcast",
            Self::Heartbeat => "heartbeat",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for PacketKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "ready" => Self::Ready,
            "message" => Self::Message,
            "broadcast" => Self::Broadcast,
            "heartbeat" => Self::Heartbeat,
            "heartbeat_ack" => Self::HeartbeatAck,
            "ack" => Self::Ack,
            "error" => Self::Error,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for PacketKind {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<PacketKind> for String {
    fn from(kind: PacketKind) -> String {
        match kind {
            PacketKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged binary message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type")]
    pub kind: PacketKind,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: impl Into<PacketKind>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// A packet with a UTF-8 text payload.
    pub fn text(kind: impl Into<PacketKind>, text: &str) -> Self {
        Self::new(kind, text.as_bytes())
    }

    /// Heartbeat from the server; always carries an empty payload.
    pub fn heartbeat() -> Self {
        Self::new(PacketKind::Heartbeat, Vec::new())
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(PacketKind::HeartbeatAck, Vec::new())
    }

    pub fn ack() -> Self {
        Self::new(PacketKind::Ack, Vec::new())
    }

    pub fn error(reason: &str) -> Self {
        Self::text(PacketKind::Error, reason)
    }

    /// Payload as UTF-8, if it is valid UTF-8.
    pub fn payload_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet(type={}, {} bytes)", self.kind, self.payload.len())
    }
}

/// Payload of a `message` packet.
///
/// Clients leave `from` empty; the server fills it with the sender's display
/// name before delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
    pub body: String,
}
