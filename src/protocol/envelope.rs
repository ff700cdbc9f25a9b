//! Wire envelope shared by client and server.
//!
//! One [`Envelope`] travels per WebSocket text frame:
//!
//! ```json
//! { "type": "agentStatusUpdated", "data": { "agentId": "a1" }, "timestamp": "2024-05-01T12:00:00Z" }
//! ```
//!
//! Inbound frames are parsed into a [`Result`] so routers can inspect the
//! outcome instead of unwinding on malformed input.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventType;

/// Reasons an inbound frame is rejected.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The frame is not valid JSON or has the wrong shape.
    #[error("invalid envelope json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The frame has no `type` field.
    #[error("envelope has no type")]
    MissingType,

    /// The frame has an empty `type` field.
    #[error("envelope type is empty")]
    EmptyType,
}

/// Typed message envelope `{type, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Routing key.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Payload; shape is determined solely by `event_type`.
    pub data: serde_json::Value,
    /// Creation time at the sender.
    pub timestamp: DateTime<Utc>,
}

/// Lenient inbound shape used before validation.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

/// Reads a sender timestamp: RFC 3339, ISO-8601 without an offset (taken
/// as UTC), or epoch milliseconds.
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(text) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
            })
            .ok(),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

impl Envelope {
    /// Creates an envelope stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<EventType>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Creates an envelope from any serializable payload.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `data` cannot be represented as JSON.
    pub fn from_payload<T: Serialize + ?Sized>(
        event_type: impl Into<EventType>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(data)?))
    }

    /// Application-level liveness probe.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(EventType::Ping, serde_json::Value::Null)
    }

    /// Application-level liveness reply.
    #[must_use]
    pub fn pong() -> Self {
        Self::new(EventType::Pong, serde_json::Value::Null)
    }

    /// Parses a text frame.
    ///
    /// A missing `data` field becomes `null`; a missing or unreadable
    /// `timestamp` becomes the receipt time.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the frame is not JSON, or has a missing or
    /// empty `type`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        let event_type = raw.event_type.ok_or(ParseError::MissingType)?;
        if event_type.is_empty() {
            return Err(ParseError::EmptyType);
        }
        let timestamp = match raw.timestamp {
            None | Some(serde_json::Value::Null) => Utc::now(),
            Some(value) => parse_timestamp(&value).unwrap_or_else(|| {
                tracing::debug!(%event_type, timestamp = %value, "unreadable timestamp; using receipt time");
                Utc::now()
            }),
        };
        Ok(Self {
            event_type: EventType::from(event_type),
            data: raw.data,
            timestamp,
        })
    }

    /// Serializes the envelope into a text frame body.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; only reachable with non-string map keys
    /// inside `data`.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
