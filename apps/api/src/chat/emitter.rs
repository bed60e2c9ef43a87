//! Turns agent events into wire frames.
//!
//! The emitter owns the sending half of a bounded channel whose receiving half
//! is the HTTP response body. `emit` and `fail` consume the emitter, so the
//! sender is dropped (and the response ends) on every exit path.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::agent::{AgentError, AgentEvent};
use crate::protocol::{StreamFrame, ToolEndPayload, ToolStartPayload};

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("client disconnected")]
    Disconnected,

    #[error("failed to serialize frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How a turn ended, from the emitter's point of view.
#[derive(Debug, PartialEq)]
pub enum EmitOutcome {
    /// `done` was written. Carries the full assistant text.
    Completed { assistant_text: String },
    /// The agent failed and an `error` frame was written in place of `done`.
    Failed { message: String },
    /// The client went away; nothing more can be written.
    Disconnected,
}

pub struct EventEmitter {
    tx: mpsc::Sender<Bytes>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Creates an emitter together with the receiver the HTTP body drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Another handle on the body channel, for writing a terminal frame
    /// after this emitter is gone.
    pub fn sender(&self) -> mpsc::Sender<Bytes> {
        self.tx.clone()
    }

    async fn send(&self, frame: StreamFrame) -> Result<(), EmitError> {
        let bytes = frame.encode()?;
        self.tx
            .send(bytes)
            .await
            .map_err(|_| EmitError::Disconnected)
    }

    /// Forwards every agent event, then writes exactly one terminal frame:
    /// `done{thread_id}` once the stream is exhausted (even with no output),
    /// or a single `error` frame if the agent fails.
    pub async fn emit<S>(self, thread_id: &str, events: S) -> EmitOutcome
    where
        S: Stream<Item = Result<AgentEvent, AgentError>>,
    {
        futures_util::pin_mut!(events);
        let mut assistant_text = String::new();

        while let Some(event) = events.next().await {
            let frame = match event {
                Ok(event) => match to_frame(event) {
                    Some(frame) => frame,
                    None => continue,
                },
                Err(e) => return self.fail(&e.to_string()).await,
            };

            if let StreamFrame::Chunk(chunk) = &frame {
                assistant_text.push_str(&chunk.content);
            }

            match self.send(frame).await {
                Ok(()) => {}
                Err(EmitError::Disconnected) => {
                    debug!("Client disconnected mid-turn on thread {thread_id}");
                    return EmitOutcome::Disconnected;
                }
                Err(e) => {
                    // Only a frame we built ourselves can fail to encode.
                    error!("Dropping unencodable frame: {e}");
                }
            }
        }

        match self.send(StreamFrame::done(thread_id)).await {
            Ok(()) => EmitOutcome::Completed { assistant_text },
            Err(e) => {
                debug!("Could not deliver done frame on thread {thread_id}: {e}");
                EmitOutcome::Disconnected
            }
        }
    }

    /// Ends the turn with one `error` frame.
    pub async fn fail(self, message: &str) -> EmitOutcome {
        warn!("Chat turn failed: {message}");
        match self.send(StreamFrame::error(message)).await {
            Ok(()) => EmitOutcome::Failed {
                message: message.to_string(),
            },
            Err(_) => EmitOutcome::Disconnected,
        }
    }
}

fn to_frame(event: AgentEvent) -> Option<StreamFrame> {
    match event {
        AgentEvent::ModelToken { text } if text.is_empty() => None,
        AgentEvent::ModelToken { text } => Some(StreamFrame::chunk(text)),
        AgentEvent::ToolStart {
            name,
            input,
            run_id,
        } => Some(StreamFrame::ToolStart(ToolStartPayload {
            tool: name,
            input,
            run_id,
        })),
        AgentEvent::ToolEnd {
            name,
            output,
            run_id,
        } => Some(StreamFrame::ToolEnd(ToolEndPayload {
            tool: name,
            output,
            run_id,
        })),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP body
// ────────────────────────────────────────────────────────────────────────────

pub fn sse_body_stream(
    mut rx: mpsc::Receiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, Infallible>(chunk);
        }
    }
}

/// Streams frames to the client as they are produced, without buffering.
pub fn sse_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(sse_body_stream(rx))).into_response()
}
