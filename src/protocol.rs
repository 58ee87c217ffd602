use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender name attached to welcome/joined/left notices.
pub const SYSTEM_NAME: &str = "system";

/// Room used when a join carries no explicit room.
pub const DEFAULT_ROOM: &str = "lobby";

/// EventType identifies what kind of packet is being sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    // Client → Server
    JoinRoom,
    ChatMessage,
    // Bidirectional: inbound from the typist, relayed to the rest of the room
    Typing,
    StopTyping,
    // Server → Client
    Message,
    RoomUsers,
}

/// Every packet is a single JSON object followed by a newline character (\n).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type")]
    pub event: EventType,
    pub payload: serde_json::Value,
}

impl Packet {
    pub fn new(event: EventType, payload: impl Serialize) -> anyhow::Result<Self> {
        Ok(Self {
            event,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Wire encoding: JSON followed by a newline.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut data = serde_json::to_vec(self)?;
        data.push(b'\n');
        Ok(data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPayload {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    pub text: String,
}

/// Inbound typing / stopTyping payload. The sender's name comes from the
/// registry, never from the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

/// Chat relays and system notices alike. System notices carry
/// [`SYSTEM_NAME`] as the username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl MessagePayload {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            username: SYSTEM_NAME.to_string(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Membership view sent to the whole room after every membership change.
/// `users` is in join order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomUsersPayload {
    pub room: String,
    pub count: usize,
    pub users: Vec<String>,
}

/// Outbound typing / stopTyping relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingEventPayload {
    pub username: String,
    pub room: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_the_wire_vocabulary() {
        let pkt = Packet::new(EventType::JoinRoom, serde_json::json!({})).unwrap();
        let raw = serde_json::to_string(&pkt).unwrap();
        assert!(raw.contains(r#""type":"joinRoom""#), "{raw}");

        let raw = serde_json::to_string(&EventType::ChatMessage).unwrap();
        assert_eq!(raw, r#""chatMessage""#);
        let raw = serde_json::to_string(&EventType::StopTyping).unwrap();
        assert_eq!(raw, r#""stopTyping""#);
        let raw = serde_json::to_string(&EventType::RoomUsers).unwrap();
        assert_eq!(raw, r#""roomUsers""#);
    }

    #[test]
    fn join_payload_room_is_optional() {
        let p: JoinPayload = serde_json::from_str(r#"{"username":"alice"}"#).unwrap();
        assert_eq!(p.username, "alice");
        assert!(p.room.is_none());

        let p: JoinPayload =
            serde_json::from_str(r#"{"username":"alice","room":"lobby"}"#).unwrap();
        assert_eq!(p.room.as_deref(), Some("lobby"));
    }

    #[test]
    fn packet_encoding_is_newline_terminated() {
        let pkt = Packet::new(EventType::Message, MessagePayload::system("hi")).unwrap();
        let data = pkt.encode().unwrap();
        assert_eq!(data.last(), Some(&b'\n'));
        // Round-trips through the line-based read pump.
        let text = std::str::from_utf8(&data[..data.len() - 1]).unwrap();
        let back: Packet = serde_json::from_str(text).unwrap();
        assert_eq!(back.event, EventType::Message);
    }
}
