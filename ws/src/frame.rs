//! Frame Parser (spec §4.3): turns a decompressed JSON payload into a typed
//! [`Frame`].

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use wavelink_types::{Frame, SignalType};

use crate::error::{GatewayError, StateError};

/// The raw `{s, sn, d}` envelope every signal is wrapped in on the wire.
#[derive(Debug, Deserialize)]
struct RawFrame {
    s: i64,
    #[serde(default)]
    sn: Option<i64>,
    #[serde(default)]
    d: Value,
}

/// Parse decompressed payload bytes into a [`Frame`].
///
/// Returns `Ok(None)` rather than an error when an EVENT frame is missing
/// `d.channel_type` — that case is logged and the frame dropped, per the
/// non-fatal rule.
pub fn parse_frame(bytes: &[u8]) -> Result<Option<Frame>, GatewayError> {
    let raw: RawFrame = serde_json::from_slice(bytes)
        .map_err(|e| StateError::InvalidPayload(e.to_string()))?;

    let signal_type = SignalType::try_from(raw.s).map_err(|_| StateError::UnknownSignal(raw.s))?;

    if signal_type == SignalType::Event {
        let has_channel_type = raw
            .d
            .get("channel_type")
            .and_then(Value::as_str)
            .is_some();
        if !has_channel_type {
            warn!("dropping EVENT frame missing channel_type");
            return Ok(None);
        }
    }

    Ok(Some(Frame {
        signal_type,
        sequence_number: raw.sn,
        payload: raw.d,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_with_channel_type() {
        let bytes = br#"{"s":0,"sn":42,"d":{"channel_type":"GROUP","type":1,"content":"hi"}}"#;
        let frame = parse_frame(bytes).expect("parse").expect("some frame");
        assert_eq!(frame.signal_type, SignalType::Event);
        assert_eq!(frame.sequence_number, Some(42));
    }

    #[test]
    fn drops_event_missing_channel_type() {
        let bytes = br#"{"s":0,"sn":1,"d":{"type":1}}"#;
        let frame = parse_frame(bytes).expect("parse");
        assert!(frame.is_none());
    }

    #[test]
    fn parses_hello() {
        let bytes = br#"{"s":1,"d":{"code":0,"session_id":"abc"}}"#;
        let frame = parse_frame(bytes).expect("parse").expect("some frame");
        assert_eq!(frame.signal_type, SignalType::Hello);
        assert_eq!(frame.sequence_number, None);
    }

    #[test]
    fn rejects_unknown_signal() {
        let bytes = br#"{"s":99,"d":{}}"#;
        assert!(parse_frame(bytes).is_err());
    }
}
