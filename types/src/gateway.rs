use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::Snowflake;

/// Discriminant carried by every signal envelope (the JSON `s` field, or the
/// inferred value when talking version-0 framing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i64)]
pub enum SignalType {
    Event = 0,
    Hello = 1,
    Ping = 2,
    Pong = 3,
    Resume = 4,
    Reconnect = 5,
    ResumeAck = 6,
    Nack = 7,
}

impl SignalType {
    pub const fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for SignalType {
    type Error = UnknownSignalType;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Event),
            1 => Ok(Self::Hello),
            2 => Ok(Self::Ping),
            3 => Ok(Self::Pong),
            4 => Ok(Self::Resume),
            5 => Ok(Self::Reconnect),
            6 => Ok(Self::ResumeAck),
            7 => Ok(Self::Nack),
            other => Err(UnknownSignalType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownSignalType(pub i64);

impl std::fmt::Display for UnknownSignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown signal type: {}", self.0)
    }
}

impl std::error::Error for UnknownSignalType {}

/// Message kind carried by an EVENT frame's payload `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MessageType {
    Text = 1,
    Image = 2,
    Video = 3,
    File = 4,
    Voice = 8,
    KMarkdown = 9,
    Card = 10,
    System = 255,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Text),
            2 => Ok(Self::Image),
            3 => Ok(Self::Video),
            4 => Ok(Self::File),
            8 => Ok(Self::Voice),
            9 => Ok(Self::KMarkdown),
            10 => Ok(Self::Card),
            255 => Ok(Self::System),
            other => Err(other),
        }
    }
}

/// Payload carried by an EVENT (`s == 0`) frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub channel_type: String,
    #[serde(rename = "type")]
    pub msg_type: i64,
    #[serde(default)]
    pub target_id: Option<Snowflake>,
    #[serde(default)]
    pub author_id: Option<Snowflake>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub msg_id: Option<String>,
    #[serde(default)]
    pub msg_timestamp: Option<i64>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub extra: Value,
}

/// A decoded signal with its parsed JSON payload — the unit application
/// code receives from the gateway session engine.
#[derive(Debug, Clone)]
pub struct Frame {
    pub signal_type: SignalType,
    pub sequence_number: Option<i64>,
    pub payload: Value,
}

impl Frame {
    /// Deserialize `payload` as an EVENT signal's typed body. Meaningful
    /// only when `signal_type == SignalType::Event`; other signal types
    /// have their own payload shapes (see [`HelloData`]) and will usually
    /// fail to deserialize as an [`EventPayload`].
    pub fn as_event_payload(&self) -> Result<EventPayload, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// HELLO signal payload (`d` of an `s == 1` frame).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloData {
    pub code: i64,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Response envelope from the gateway-index discovery endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIndexResponse {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub data: GatewayIndexData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayIndexData {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_type_round_trip() {
        for raw in 0i64..=7 {
            let parsed = SignalType::try_from(raw).expect("known signal");
            assert_eq!(parsed.as_i64(), raw);
        }
        assert!(SignalType::try_from(8).is_err());
    }

    #[test]
    fn message_type_system() {
        assert_eq!(MessageType::try_from(255), Ok(MessageType::System));
        assert_eq!(MessageType::try_from(200), Err(200));
    }

    #[test]
    fn frame_as_event_payload() {
        let frame = Frame {
            signal_type: SignalType::Event,
            sequence_number: Some(1),
            payload: serde_json::json!({
                "channel_type": "GROUP",
                "type": 1,
                "content": "hi",
            }),
        };
        let event = frame.as_event_payload().expect("typed event payload");
        assert_eq!(event.channel_type, "GROUP");
        assert_eq!(event.content.as_deref(), Some("hi"));
    }
}
