//! Frames exchanged over the chat stream.
//!
//! Inbound frames are adjacently tagged:
//!
//! ```json
//! { "type": "chunk", "payload": "Hel" }
//! { "type": "full_history", "payload": [ { "id": "1", "role": "user", ... } ] }
//! ```
//!
//! Outbound frames are either the raw text the user typed or a JSON object
//! such as [`ControlFrame::Cancel`].

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Human-readable connection status. Carries the ready signal.
    Status(String),
    FullHistory(Vec<Message>),
    Message(Message),
    Chunk(String),
    ToolCode(String),
    ToolOutput(String),
    /// Stream lifecycle signal, e.g. end of stream.
    Event(String),
    Error(String),
    Warning(String),
}

impl InboundFrame {
    pub const KNOWN_TYPES: [&'static str; 9] = [
        "status",
        "full_history",
        "message",
        "chunk",
        "tool_code",
        "tool_output",
        "event",
        "error",
        "warning",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Status(_) => "status",
            InboundFrame::FullHistory(_) => "full_history",
            InboundFrame::Message(_) => "message",
            InboundFrame::Chunk(_) => "chunk",
            InboundFrame::ToolCode(_) => "tool_code",
            InboundFrame::ToolOutput(_) => "tool_output",
            InboundFrame::Event(_) => "event",
            InboundFrame::Error(_) => "error",
            InboundFrame::Warning(_) => "warning",
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("unknown frame type `{0}`")]
    UnknownType(String),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one inbound text frame.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, FrameDecodeError> {
    #[derive(Deserialize)]
    struct FrameTag {
        #[serde(rename = "type")]
        kind: Option<String>,
    }

    match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => Ok(frame),
        Err(err) => match serde_json::from_str::<FrameTag>(text) {
            Ok(FrameTag { kind: Some(kind) })
                if !InboundFrame::KNOWN_TYPES.contains(&kind.as_str()) =>
            {
                Err(FrameDecodeError::UnknownType(kind))
            }
            _ => Err(FrameDecodeError::Malformed(err)),
        },
    }
}

/// A single outbound frame before serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    Text(String),
    Json(Value),
}

impl OutboundPayload {
    /// Text of the frame as it goes on the wire.
    pub fn into_frame(self) -> serde_json::Result<String> {
        match self {
            OutboundPayload::Text(text) => Ok(text),
            OutboundPayload::Json(value) => serde_json::to_string(&value),
        }
    }
}

impl From<String> for OutboundPayload {
    fn from(text: String) -> Self {
        OutboundPayload::Text(text)
    }
}

impl From<&str> for OutboundPayload {
    fn from(text: &str) -> Self {
        OutboundPayload::Text(text.to_string())
    }
}

impl From<Value> for OutboundPayload {
    fn from(value: Value) -> Self {
        OutboundPayload::Json(value)
    }
}

/// Structured requests the client sends in-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Ask the backend to stop generating the current reply. The channel stays open.
    Cancel,
}

impl ControlFrame {
    pub fn to_payload(&self) -> serde_json::Result<OutboundPayload> {
        Ok(OutboundPayload::Json(serde_json::to_value(self)?))
    }
}
