//! Chat stream wire format, shared by the `/api/v1/chat` endpoint and its clients.
//!
//! Every frame is two lines, `event: <tag>` then `data: <json>`, followed by a
//! blank line. The tag set is closed: `chunk`, `tool_start`, `tool_end`, `done`
//! and `error`. Decoders skip frames with any other tag.

pub mod decoder;

pub use decoder::{decode_stream, DecodeError, FrameDecoder, RawFrame};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_CHUNK: &str = "chunk";
pub const EVENT_TOOL_START: &str = "tool_start";
pub const EVENT_TOOL_END: &str = "tool_end";
pub const EVENT_DONE: &str = "done";
pub const EVENT_ERROR: &str = "error";

// ────────────────────────────────────────────────────────────────────────────
// Payloads
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStartPayload {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEndPayload {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Terminal frame of a successful turn. The server always fills `thread_id`;
/// clients treat it as optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Frame
// ────────────────────────────────────────────────────────────────────────────

/// A typed chat stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Chunk(ChunkPayload),
    ToolStart(ToolStartPayload),
    ToolEnd(ToolEndPayload),
    Done(DonePayload),
    Error(ErrorPayload),
}

impl StreamFrame {
    pub fn chunk(content: impl Into<String>) -> Self {
        StreamFrame::Chunk(ChunkPayload {
            content: content.into(),
        })
    }

    pub fn done(thread_id: impl Into<String>) -> Self {
        StreamFrame::Done(DonePayload {
            thread_id: Some(thread_id.into()),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamFrame::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// The `event:` tag this frame is written with.
    pub fn event(&self) -> &'static str {
        match self {
            StreamFrame::Chunk(_) => EVENT_CHUNK,
            StreamFrame::ToolStart(_) => EVENT_TOOL_START,
            StreamFrame::ToolEnd(_) => EVENT_TOOL_END,
            StreamFrame::Done(_) => EVENT_DONE,
            StreamFrame::Error(_) => EVENT_ERROR,
        }
    }

    /// Serializes the frame into its wire form, terminated by a blank line.
    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        let data = match self {
            StreamFrame::Chunk(p) => serde_json::to_string(p)?,
            StreamFrame::ToolStart(p) => serde_json::to_string(p)?,
            StreamFrame::ToolEnd(p) => serde_json::to_string(p)?,
            StreamFrame::Done(p) => serde_json::to_string(p)?,
            StreamFrame::Error(p) => serde_json::to_string(p)?,
        };
        Ok(Bytes::from(format!("event: {}\ndata: {data}\n\n", self.event())))
    }

    /// Interprets a decoded frame. Unknown tags yield `Ok(None)`; a known tag
    /// whose payload has the wrong shape is a decode error for that frame.
    pub fn parse(raw: RawFrame) -> Result<Option<Self>, DecodeError> {
        let RawFrame { event, data } = raw;
        let frame = match event.as_str() {
            EVENT_CHUNK => serde_json::from_value(data).map(StreamFrame::Chunk),
            EVENT_TOOL_START => serde_json::from_value(data).map(StreamFrame::ToolStart),
            EVENT_TOOL_END => serde_json::from_value(data).map(StreamFrame::ToolEnd),
            EVENT_DONE => serde_json::from_value(data).map(StreamFrame::Done),
            EVENT_ERROR => serde_json::from_value(data).map(StreamFrame::Error),
            _ => return Ok(None),
        };
        frame
            .map(Some)
            .map_err(|source| DecodeError::InvalidPayload { event, source })
    }
}
