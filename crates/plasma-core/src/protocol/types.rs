//! Packet types and payload definitions.
//!
//! Types are dotted `<category>.<action>` strings. Categories: `s` (session),
//! `u` (user lifecycle), `m` (messages), `d` (downloads), `e` (errors).

use super::kind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Packet types understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Key exchange record, always sent in clear.
    Handshake,
    /// Client requests authentication under a name.
    Connect,
    /// A user joined (server notice).
    Join,
    /// Client leaves, or a user left (server notice).
    Leave,
    /// Chat message.
    Message,
    /// File upload or upload notice.
    Binary,
    /// Download request.
    Download,
    /// Download response carrying file data.
    Content,
    /// Download id did not match any file.
    InvalidId,
    /// Server error reply (`e.*`).
    Error(ErrorKind),
    /// Well-formed but not handled here.
    Unknown,
}

/// Server error reply kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `e.parse`
    Parse,
    /// `e.missing`
    Missing,
    /// `e.overflow`
    Overflow,
    /// `e.invalid`
    Invalid,
    /// `e.taken`
    Taken,
    /// `e.unexpected`
    Unexpected,
    /// `e.server`
    Server,
    /// `e.ssl`
    Ssl,
    /// Any other `e.*`.
    Other,
}

impl PacketType {
    /// Parse a dotted type string.
    ///
    /// The string must contain exactly one `.` with a non-empty category
    /// and action; anything else is [`Error::Parse`]. Well-formed types
    /// this crate does not know map to [`PacketType::Unknown`].
    pub fn parse(s: &str) -> Result<Self> {
        let (category, action) = s
            .split_once('.')
            .ok_or_else(|| Error::Parse(format!("type has no category: {:?}", s)))?;

        if action.contains('.') {
            return Err(Error::Parse(format!("type has more than one dot: {:?}", s)));
        }
        if category.trim().is_empty() || action.trim().is_empty() {
            return Err(Error::Parse(format!("empty category or action: {:?}", s)));
        }

        let packet_type = match s {
            kind::HANDSHAKE => Self::Handshake,
            kind::CONNECT => Self::Connect,
            kind::JOIN => Self::Join,
            kind::LEAVE => Self::Leave,
            kind::MESSAGE => Self::Message,
            kind::BINARY => Self::Binary,
            kind::DOWNLOAD => Self::Download,
            kind::DOWNLOAD_CONTENT => Self::Content,
            kind::DOWNLOAD_INVALID_ID => Self::InvalidId,
            kind::ERR_PARSE => Self::Error(ErrorKind::Parse),
            kind::ERR_MISSING => Self::Error(ErrorKind::Missing),
            kind::ERR_OVERFLOW => Self::Error(ErrorKind::Overflow),
            kind::ERR_INVALID => Self::Error(ErrorKind::Invalid),
            kind::ERR_TAKEN => Self::Error(ErrorKind::Taken),
            kind::ERR_UNEXPECTED => Self::Error(ErrorKind::Unexpected),
            kind::ERR_SERVER => Self::Error(ErrorKind::Server),
            kind::ERR_SSL => Self::Error(ErrorKind::Ssl),
            _ if category == "e" => Self::Error(ErrorKind::Other),
            _ => Self::Unknown,
        };
        Ok(packet_type)
    }

    /// Whether this type sits behind the authentication gate (`m.*`, `d.*`).
    pub fn requires_auth(self) -> bool {
        matches!(
            self,
            Self::Message | Self::Binary | Self::Download | Self::Content | Self::InvalidId
        )
    }
}

/// Identity of an authenticated peer as shown to others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    /// Server-derived identifier.
    pub uid: String,
    /// Display name.
    pub name: String,
}

impl PeerSummary {
    /// Author used for server-originated notices and errors.
    pub fn system() -> Self {
        Self {
            uid: "system".into(),
            name: "System".into(),
        }
    }
}

/// Server state attached to every server-originated packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    /// Server name.
    pub name: String,
    /// Authenticated peers, in join order.
    pub users: Vec<PeerSummary>,
    /// Byte ceiling in effect when the packet was sent.
    pub packet_limit: usize,
}

/// `s.handshake` sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeOffer {
    /// Generator.
    pub base: u64,
    /// Modulus.
    pub modu: u64,
    /// Server public value.
    #[serde(rename = "pub")]
    pub public: u64,
}

/// `s.handshake` reply sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReply {
    /// Client public value.
    #[serde(rename = "pub")]
    pub public: u64,
}

/// `data` of every server-originated packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerData {
    /// Sender, or the system author.
    pub author: PeerSummary,
    /// Text for messages and notices, an object for file packets.
    pub content: serde_json::Value,
    /// Unix seconds.
    pub timestamp: f64,
}

/// `m.bin` notice content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNotice {
    /// Original file name.
    pub name: String,
    /// Download id.
    pub id: String,
}

/// `d.content` content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    /// Original file name.
    pub name: String,
    /// Hex-encoded file bytes.
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_types() {
        assert_eq!(PacketType::parse("m.msg").expect("valid"), PacketType::Message);
        assert_eq!(PacketType::parse("s.handshake").expect("valid"), PacketType::Handshake);
        assert_eq!(
            PacketType::parse("e.taken").expect("valid"),
            PacketType::Error(ErrorKind::Taken)
        );
        assert_eq!(PacketType::parse("x.unknown").expect("valid"), PacketType::Unknown);
    }

    #[test]
    fn test_parse_malformed_types() {
        for bad in ["foo", "a.b.c", ".msg", "m.", "", " .x", "."] {
            assert!(
                matches!(PacketType::parse(bad), Err(Error::Parse(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_auth_gate_categories() {
        assert!(PacketType::Message.requires_auth());
        assert!(PacketType::Download.requires_auth());
        assert!(!PacketType::Connect.requires_auth());
        assert!(!PacketType::Leave.requires_auth());
    }

    #[test]
    fn test_handshake_field_names() {
        let offer = HandshakeOffer { base: 1234, modu: 1_000_000_000_000_007, public: 42 };
        let json = serde_json::to_value(offer).expect("serialize");
        assert_eq!(json["pub"], 42);
        assert_eq!(json["modu"], 1_000_000_000_000_007u64);
    }
}
