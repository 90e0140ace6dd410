//! Message types exchanged between the connection and its subscribers.

use chrono::{DateTime, Utc};
use serde::de::{Error as _, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::serde_as;

use crate::Result;
use crate::serde_helpers::{StringOrNone, TextFromAny, deserialize_with_warnings};
use crate::ws::WsError;

/// Text used when a frame carries no usable `message` field.
pub const DEFAULT_MESSAGE_TEXT: &str = "New notification";

/// Frame payload as sent by the server.
///
/// Every field is optional on the wire. A non-string `message` is kept as its JSON text and a
/// non-string `type` is dropped.
#[non_exhaustive]
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WireFrame {
    /// Human readable text
    #[serde_as(as = "TextFromAny")]
    #[serde(default)]
    pub message: Option<String>,
    /// Classification tag (e.g. `reminder`, `task_completed`)
    #[serde_as(as = "StringOrNone")]
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Opaque structured payload
    pub data: Option<Value>,
    /// Server-side send time. Accepted but never trusted.
    #[expect(
        dead_code,
        reason = "Captured so the server clock is not reported as an unknown field"
    )]
    #[serde(default, rename = "timestamp")]
    server_timestamp: Option<IgnoredAny>,
}

/// One notification delivered to subscribers.
///
/// Serializes with the field names of the wire protocol so UI layers can forward it as-is.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Human readable payload, [`DEFAULT_MESSAGE_TEXT`] when the frame had none
    #[serde(rename = "message")]
    pub text: String,
    /// Optional classification tag subscribers branch on
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Optional opaque structured data
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Receipt time assigned by the connection manager (ISO-8601 on the wire)
    #[serde(rename = "timestamp")]
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Build a message from a parsed frame, stamping it with the local receipt time.
    ///
    /// A missing or empty `message` falls back to [`DEFAULT_MESSAGE_TEXT`].
    #[must_use]
    pub fn from_frame(frame: WireFrame, received_at: DateTime<Utc>) -> Self {
        let text = frame
            .message
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| DEFAULT_MESSAGE_TEXT.to_owned());

        Self {
            text,
            kind: frame.kind,
            payload: frame.data.filter(|data| !data.is_null()),
            received_at,
        }
    }
}

/// Parse one inbound text frame.
///
/// Invalid JSON and a bare `null` are rejected. Any other JSON value that is not an object
/// carries no fields and yields an empty frame.
pub fn parse_frame(bytes: &[u8]) -> Result<WireFrame> {
    let value: Value = serde_json::from_slice(bytes).map_err(WsError::MessageParse)?;
    match value {
        Value::Object(_) => {
            let frame = deserialize_with_warnings(value).map_err(WsError::MessageParse)?;
            Ok(frame)
        }
        Value::Null => {
            Err(WsError::MessageParse(serde_json::Error::custom("frame is null")).into())
        }
        other => {
            #[cfg(feature = "tracing")]
            tracing::debug!(frame = %other, "Frame is not an object, using empty frame");
            #[cfg(not(feature = "tracing"))]
            let _ = &other;
            Ok(WireFrame::default())
        }
    }
}
