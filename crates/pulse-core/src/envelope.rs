//! Inbound frame envelopes.
//!
//! Every frame is expected to be a UTF-8 JSON object whose top-level `type`
//! string selects its route. The remaining fields form the payload, which
//! stays opaque to the socket layer.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::ENVELOPE_TYPE_FIELD;
use crate::errors::EnvelopeError;

/// Split a frame into its `type` and the remaining payload fields.
pub fn decode_envelope(frame: &str) -> Result<(String, Value), EnvelopeError> {
    let value: Value = serde_json::from_str(frame)?;
    let Value::Object(mut fields) = value else {
        return Err(EnvelopeError::NotAnObject);
    };
    let message_type = match fields.remove(ENVELOPE_TYPE_FIELD) {
        Some(Value::String(t)) => t,
        _ => return Err(EnvelopeError::MissingType),
    };
    Ok((message_type, Value::Object(fields)))
}

/// A decoded inbound frame, tagged with the connection it arrived on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedMessage {
    /// Connection the frame arrived on.
    pub connection_id: String,
    /// Envelope `type`, the routing key.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Envelope fields other than `type`.
    pub payload: Value,
    /// The frame exactly as received.
    pub raw_frame: String,
    /// When the frame was decoded.
    pub received_at: DateTime<Utc>,
}

impl RoutedMessage {
    /// Decode a raw frame received on `connection_id`.
    pub fn decode(connection_id: &str, frame: &str) -> Result<Self, EnvelopeError> {
        let (message_type, payload) = decode_envelope(frame)?;
        Ok(Self {
            connection_id: connection_id.to_owned(),
            message_type,
            payload,
            raw_frame: frame.to_owned(),
            received_at: Utc::now(),
        })
    }

    /// Deserialize the payload fields into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Look up one payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.as_object().and_then(|m| m.get(name))
    }

    /// Rebuild the full envelope (payload plus `type`).
    pub fn envelope(&self) -> Value {
        let mut fields = self.payload.as_object().cloned().unwrap_or_else(Map::new);
        let _ = fields.insert(
            ENVELOPE_TYPE_FIELD.to_owned(),
            Value::String(self.message_type.clone()),
        );
        Value::Object(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn decode_splits_type_from_payload() {
        let (t, payload) =
            decode_envelope(r#"{"type":"nginx_stats","stats":{"totalVisits":42}}"#).unwrap();
        assert_eq!(t, "nginx_stats");
        assert_eq!(payload, json!({"stats": {"totalVisits": 42}}));
    }

    #[test]
    fn decode_type_only_gives_empty_payload() {
        let (t, payload) = decode_envelope(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(t, "ping");
        assert_eq!(payload, json!({}));
    }

    #[test]
    fn decode_rejects_non_json() {
        assert_matches!(decode_envelope("not-json"), Err(EnvelopeError::InvalidJson(_)));
        assert_matches!(decode_envelope(""), Err(EnvelopeError::InvalidJson(_)));
    }

    #[test]
    fn decode_rejects_non_objects() {
        assert_matches!(decode_envelope("[1,2,3]"), Err(EnvelopeError::NotAnObject));
        assert_matches!(decode_envelope("\"type\""), Err(EnvelopeError::NotAnObject));
        assert_matches!(decode_envelope("null"), Err(EnvelopeError::NotAnObject));
    }

    #[test]
    fn decode_rejects_missing_or_non_string_type() {
        assert_matches!(decode_envelope(r#"{"data":1}"#), Err(EnvelopeError::MissingType));
        assert_matches!(decode_envelope(r#"{"type":7}"#), Err(EnvelopeError::MissingType));
        assert_matches!(decode_envelope(r#"{"type":null}"#), Err(EnvelopeError::MissingType));
    }

    #[test]
    fn routed_message_keeps_raw_frame() {
        let frame = r#"{"type":"site_selected","site":{"id":"1","name":"Shop"}}"#;
        let msg = RoutedMessage::decode("main", frame).unwrap();
        assert_eq!(msg.connection_id, "main");
        assert_eq!(msg.message_type, "site_selected");
        assert_eq!(msg.raw_frame, frame);
        assert_eq!(msg.field("site").unwrap()["name"], "Shop");
    }

    #[test]
    fn payload_as_typed() {
        #[derive(Deserialize)]
        struct Ping {
            data: String,
        }
        let msg = RoutedMessage::decode("main", r#"{"type":"ping","data":"test"}"#).unwrap();
        let ping: Ping = msg.payload_as().unwrap();
        assert_eq!(ping.data, "test");
    }

    #[test]
    fn envelope_restores_type() {
        let msg = RoutedMessage::decode("logs", r#"{"type":"live_log","log":{"id":"a"}}"#).unwrap();
        assert_eq!(msg.envelope(), json!({"type": "live_log", "log": {"id": "a"}}));
    }

    #[test]
    fn serializes_type_key() {
        let msg = RoutedMessage::decode("main", r#"{"type":"ping"}"#).unwrap();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["connectionId"], "main");
        assert_eq!(value["rawFrame"], r#"{"type":"ping"}"#);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn arbitrary_text_never_panics(frame in ".*") {
                let _ = decode_envelope(&frame);
            }

            #[test]
            fn any_string_type_is_routed(t in "[a-z_]{1,24}", n in any::<i64>()) {
                let frame = json!({"type": t, "n": n}).to_string();
                let (decoded, payload) = decode_envelope(&frame).unwrap();
                prop_assert_eq!(decoded, t);
                prop_assert_eq!(&payload["n"], &json!(n));
                prop_assert!(payload.get("type").is_none());
            }
        }
    }
}
