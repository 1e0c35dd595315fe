//! The JSON packet envelope.
//!
//! `{"type": "<category>.<action>", "data": {...}, "guild"?: {...}}`

use super::types::{GuildSnapshot, PacketType, PeerSummary, ServerData};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// One logical protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Dotted type string.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload mapping.
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Server snapshot, present on server-originated data packets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild: Option<GuildSnapshot>,
}

impl Packet {
    /// Create a packet with the given payload.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            guild: None,
        }
    }

    /// Create a packet with an empty payload.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self::new(kind, empty_object())
    }

    /// Create a packet whose payload is a serialized struct.
    pub fn with_data<T: Serialize>(kind: impl Into<String>, data: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(data)?))
    }

    /// Build a server-originated packet.
    pub fn from_server(
        kind: impl Into<String>,
        author: PeerSummary,
        content: Value,
        timestamp: f64,
        guild: GuildSnapshot,
    ) -> Result<Self> {
        let data = ServerData {
            author,
            content,
            timestamp,
        };
        let mut packet = Self::with_data(kind, &data)?;
        packet.guild = Some(guild);
        Ok(packet)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Validate the envelope and classify its type.
    ///
    /// Fails with [`Error::Parse`] on a malformed type or non-mapping data.
    pub fn packet_type(&self) -> Result<PacketType> {
        if !self.data.is_object() {
            return Err(Error::Parse("data is not a mapping".into()));
        }
        PacketType::parse(&self.kind)
    }

    /// Get a payload field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|v| !v.is_null())
    }

    /// Get a payload field as text. Numbers and booleans are stringified.
    pub fn text_field(&self, key: &str) -> Option<String> {
        match self.field(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Deserialize the payload into a typed struct.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| Error::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_data_defaults_to_empty_mapping() {
        let packet = Packet::from_bytes(br#"{"type":"u.leave"}"#).expect("should parse");
        assert_eq!(packet.data, json!({}));
        assert_eq!(packet.packet_type().expect("valid"), PacketType::Leave);
    }

    #[test]
    fn test_missing_type_is_parse_error() {
        assert!(matches!(
            Packet::from_bytes(br#"{"data":{}}"#),
            Err(Error::Parse(_))
        ));
        assert!(matches!(Packet::from_bytes(b"not json"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_non_mapping_data_rejected() {
        let packet = Packet::new("m.msg", json!([1, 2]));
        assert!(matches!(packet.packet_type(), Err(Error::Parse(_))));
    }

    #[test]
    fn test_text_field() {
        let packet = Packet::new("m.msg", json!({"content": 42, "name": null}));
        assert_eq!(packet.text_field("content").as_deref(), Some("42"));
        assert_eq!(packet.text_field("name"), None);
        assert_eq!(packet.text_field("absent"), None);
    }

    #[test]
    fn test_guild_omitted_when_absent() {
        let bytes = Packet::bare("u.leave").to_bytes().expect("serialize");
        let text = String::from_utf8(bytes).expect("utf8");
        assert!(!text.contains("guild"));
    }

    #[test]
    fn test_server_packet_shape() {
        let guild = GuildSnapshot {
            name: "Server".into(),
            users: vec![],
            packet_limit: 1_048_576,
        };
        let packet = Packet::from_server("m.msg", PeerSummary::system(), json!("hi"), 1.5, guild)
            .expect("build");
        let value = serde_json::to_value(&packet).expect("serialize");

        assert_eq!(value["data"]["author"]["uid"], "system");
        assert_eq!(value["data"]["content"], "hi");
        assert_eq!(value["guild"]["packet_limit"], 1_048_576);
    }
}
