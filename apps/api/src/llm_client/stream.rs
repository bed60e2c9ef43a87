//! Messages API stream events folded into text and complete tool calls.

use std::collections::HashMap;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::warn;

use super::LlmError;
use crate::protocol::{decode_stream, RawFrame};

/// What one model call produced, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    /// A tool call whose input JSON has been fully received.
    ToolUse { id: String, name: String, input: Value },
}

pub type ModelStream = BoxStream<'static, Result<ModelEvent, LlmError>>;

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

#[derive(Debug, PartialEq)]
enum Step {
    Emit(ModelEvent),
    Stop,
    Skip,
}

/// Tracks open `tool_use` content blocks by index until they close.
#[derive(Debug, Default)]
struct TurnDecoder {
    tool_blocks: HashMap<u64, PendingToolUse>,
}

impl TurnDecoder {
    fn on_frame(&mut self, frame: &RawFrame) -> Result<Step, LlmError> {
        let index = frame.data["index"].as_u64().unwrap_or_default();

        match frame.event.as_str() {
            "content_block_start" => {
                let block = &frame.data["content_block"];
                if block["type"] == "tool_use" {
                    self.tool_blocks.insert(
                        index,
                        PendingToolUse {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            input_json: String::new(),
                        },
                    );
                }
                Ok(Step::Skip)
            }
            "content_block_delta" => {
                let delta = &frame.data["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => match delta["text"].as_str() {
                        Some(text) if !text.is_empty() => {
                            Ok(Step::Emit(ModelEvent::Text(text.to_string())))
                        }
                        _ => Ok(Step::Skip),
                    },
                    Some("input_json_delta") => {
                        if let (Some(pending), Some(part)) = (
                            self.tool_blocks.get_mut(&index),
                            delta["partial_json"].as_str(),
                        ) {
                            pending.input_json.push_str(part);
                        }
                        Ok(Step::Skip)
                    }
                    _ => Ok(Step::Skip),
                }
            }
            "content_block_stop" => match self.tool_blocks.remove(&index) {
                Some(pending) => {
                    let input = if pending.input_json.trim().is_empty() {
                        Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&pending.input_json).map_err(|e| {
                            LlmError::Stream(format!(
                                "invalid input for tool `{}`: {e}",
                                pending.name
                            ))
                        })?
                    };
                    Ok(Step::Emit(ModelEvent::ToolUse {
                        id: pending.id,
                        name: pending.name,
                        input,
                    }))
                }
                None => Ok(Step::Skip),
            },
            "message_stop" => Ok(Step::Stop),
            "error" => Err(LlmError::Stream(
                frame.data["error"]["message"]
                    .as_str()
                    .unwrap_or("Unknown model stream error")
                    .to_string(),
            )),
            _ => Ok(Step::Skip),
        }
    }
}

pub(crate) fn model_events<S>(bytes: S) -> ModelStream
where
    S: futures_util::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let frames = decode_stream(bytes);
        futures_util::pin_mut!(frames);
        let mut turn = TurnDecoder::default();

        while let Some(item) = frames.next().await {
            match item {
                Ok(Ok(frame)) => match turn.on_frame(&frame) {
                    Ok(Step::Emit(event)) => {
                        yield Ok(event);
                    }
                    Ok(Step::Stop) => break,
                    Ok(Step::Skip) => {}
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                },
                Ok(Err(e)) => warn!("Skipping undecodable LLM stream frame: {e}"),
                Err(e) => {
                    yield Err(LlmError::Http(e));
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: &str, data: Value) -> RawFrame {
        RawFrame {
            event: event.to_string(),
            data,
        }
    }

    #[test]
    fn test_text_delta_is_emitted() {
        let mut turn = TurnDecoder::default();
        let step = turn
            .on_frame(&frame(
                "content_block_delta",
                json!({"index": 0, "delta": {"type": "text_delta", "text": "Hello"}}),
            ))
            .unwrap();
        assert_eq!(step, Step::Emit(ModelEvent::Text("Hello".to_string())));
    }

    #[test]
    fn test_tool_input_is_reassembled_across_deltas() {
        let mut turn = TurnDecoder::default();
        turn.on_frame(&frame(
            "content_block_start",
            json!({"index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "getResume", "input": {}}}),
        ))
        .unwrap();
        for part in ["{\"resu", "meId\": ", "3}"] {
            let step = turn
                .on_frame(&frame(
                    "content_block_delta",
                    json!({"index": 1, "delta": {"type": "input_json_delta", "partial_json": part}}),
                ))
                .unwrap();
            assert_eq!(step, Step::Skip);
        }

        let step = turn
            .on_frame(&frame("content_block_stop", json!({"index": 1})))
            .unwrap();
        assert_eq!(
            step,
            Step::Emit(ModelEvent::ToolUse {
                id: "toolu_1".to_string(),
                name: "getResume".to_string(),
                input: json!({"resumeId": 3}),
            })
        );
    }

    #[test]
    fn test_tool_without_input_gets_empty_object() {
        let mut turn = TurnDecoder::default();
        turn.on_frame(&frame(
            "content_block_start",
            json!({"index": 0, "content_block": {"type": "tool_use", "id": "toolu_2", "name": "listResumes"}}),
        ))
        .unwrap();
        let step = turn
            .on_frame(&frame("content_block_stop", json!({"index": 0})))
            .unwrap();
        assert!(matches!(
            step,
            Step::Emit(ModelEvent::ToolUse { input, .. }) if input == json!({})
        ));
    }

    #[test]
    fn test_error_event_fails_stream() {
        let mut turn = TurnDecoder::default();
        let err = turn
            .on_frame(&frame(
                "error",
                json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            ))
            .unwrap_err();
        assert_eq!(err.to_string(), "Stream error: Overloaded");
    }

    #[test]
    fn test_message_stop_ends_and_text_block_stop_is_skipped() {
        let mut turn = TurnDecoder::default();
        assert_eq!(
            turn.on_frame(&frame("content_block_stop", json!({"index": 0})))
                .unwrap(),
            Step::Skip
        );
        assert_eq!(
            turn.on_frame(&frame("message_stop", json!({"type": "message_stop"})))
                .unwrap(),
            Step::Stop
        );
    }

    #[tokio::test]
    async fn test_model_events_from_raw_stream() {
        let body = "event: message_start\ndata: {\"type\":\"message_start\"}\n\n\
                    event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Let me look.\"}}\n\n\
                    event: content_block_start\ndata: {\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_9\",\"name\":\"getResume\",\"input\":{}}}\n\n\
                    event: content_block_delta\ndata: {\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"resumeId\\\":7}\"}}\n\n\
                    event: content_block_stop\ndata: {\"index\":1}\n\n\
                    event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n";
        let reads: Vec<Result<bytes::Bytes, reqwest::Error>> =
            vec![Ok(bytes::Bytes::from_static(body.as_bytes()))];

        let events: Vec<ModelEvent> = model_events(futures_util::stream::iter(reads))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                ModelEvent::Text("Let me look.".to_string()),
                ModelEvent::ToolUse {
                    id: "toolu_9".to_string(),
                    name: "getResume".to_string(),
                    input: json!({"resumeId": 7}),
                },
            ]
        );
    }
}
