//! Wire envelope for events on both transports.
//!
//! Messages are flat UTF-8 JSON objects carrying `event_type` and
//! `emitted_at` alongside the payload fields, so consumers can extract
//! the event type without knowing the payload shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// A single event as serialized onto the wire.
///
/// Transient: constructed at publish time, serialized, transmitted, and
/// discarded. The payload map is flattened into the top-level object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event type wire name (e.g. `"bot.trade.executed"`).
    pub event_type: String,
    /// Publish timestamp (RFC 3339 on the wire).
    pub emitted_at: DateTime<Utc>,
    /// Event-specific payload fields, flattened alongside the header.
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(event_type: &str, data: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            event_type: event_type.to_string(),
            emitted_at: Utc::now(),
            data,
        }
    }

    /// Serializes the envelope to its UTF-8 JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// encoded as JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserializes an envelope from its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] if the bytes are not a JSON
    /// object with `event_type` and `emitted_at` fields.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn sample_data() -> serde_json::Map<String, serde_json::Value> {
        let mut data = serde_json::Map::new();
        data.insert(
            "user_id".to_string(),
            serde_json::Value::String("u1".to_string()),
        );
        data.insert("amount".to_string(), serde_json::json!(0.5));
        data
    }

    #[test]
    fn wire_form_is_flat() {
        let envelope = EventEnvelope::new("bot.trade.executed", sample_data());
        let Ok(bytes) = envelope.to_bytes() else {
            panic!("serialization failed");
        };
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            panic!("wire form is not JSON");
        };
        assert_eq!(
            value.get("event_type").and_then(serde_json::Value::as_str),
            Some("bot.trade.executed")
        );
        assert_eq!(
            value.get("user_id").and_then(serde_json::Value::as_str),
            Some("u1")
        );
        assert!(value.get("emitted_at").is_some());
        assert!(value.get("data").is_none());
    }

    #[test]
    fn round_trip_preserves_payload() {
        let envelope = EventEnvelope::new("user.created", sample_data());
        let Ok(bytes) = envelope.to_bytes() else {
            panic!("serialization failed");
        };
        let Ok(decoded) = EventEnvelope::from_bytes(&bytes) else {
            panic!("deserialization failed");
        };
        assert_eq!(decoded.event_type, "user.created");
        assert_eq!(decoded.data.get("amount"), Some(&serde_json::json!(0.5)));
    }

    #[test]
    fn non_json_bytes_are_malformed() {
        let result = EventEnvelope::from_bytes(b"not json at all");
        assert!(matches!(result, Err(EventError::Malformed(_))));
    }
}
