//! Incremental decoder for `event:` / `data:` framed streams.

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One undecoded frame: the event tag and its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub event: String,
    pub data: Value,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON in `{event}` frame: {source}")]
    MalformedJson {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected payload for `{event}` frame: {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("line exceeded {limit} bytes without a newline")]
    LineTooLong { limit: usize },
}

/// Turns network reads into frames.
///
/// Buffering is done on bytes, not text, so neither a line nor a multi-byte
/// UTF-8 sequence is corrupted when a read boundary falls inside it. An
/// `event:` line is held until its `data:` line arrives, even across reads.
///
/// A partial line longer than the line limit is dropped with a
/// `LineTooLong` error, and input is skipped up to the next newline.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending_event: Option<String>,
    max_line: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_line_limit(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line_limit(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            pending_event: None,
            max_line,
            discarding: false,
        }
    }

    /// Feeds one read and drains every frame completed by it.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Vec<Result<RawFrame, DecodeError>> {
        let mut frames = Vec::new();

        if self.discarding {
            match bytes.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    bytes = &bytes[end + 1..];
                }
                None => return frames,
            }
        }
        self.buffer.extend_from_slice(bytes);

        if let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') {
            let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();

            // Drop the final '\n' so the split does not yield a phantom empty line.
            for line in complete[..complete.len() - 1].split(|b| *b == b'\n') {
                let line = String::from_utf8_lossy(line);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(frame) = self.accept_line(line) {
                    frames.push(frame);
                }
            }
        }

        if self.buffer.len() > self.max_line {
            warn!(
                "Dropping a {}-byte line with no newline in sight",
                self.buffer.len()
            );
            self.buffer.clear();
            self.pending_event = None;
            self.discarding = true;
            frames.push(Err(DecodeError::LineTooLong {
                limit: self.max_line,
            }));
        }
        frames
    }

    /// Ends the stream. A retained partial line means the last frame was
    /// truncated; it is discarded.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() || self.pending_event.is_some() {
            debug!(
                "Discarding truncated frame at end of stream ({} bytes buffered)",
                self.buffer.len()
            );
        }
        self.buffer.clear();
        self.pending_event = None;
        self.discarding = false;
    }

    fn accept_line(&mut self, line: &str) -> Option<Result<RawFrame, DecodeError>> {
        if let Some(tag) = line.strip_prefix("event:") {
            self.pending_event = Some(tag.trim().to_string());
            return None;
        }

        // Anything other than the data line directly after `event:` is skipped,
        // and also breaks the pairing.
        let event = self.pending_event.take()?;
        let payload = line.strip_prefix("data:")?;

        match serde_json::from_str(payload.trim()) {
            Ok(data) => Some(Ok(RawFrame { event, data })),
            Err(source) => Some(Err(DecodeError::MalformedJson { event, source })),
        }
    }
}

/// Adapts a byte stream into a lazy stream of frames.
///
/// The outer `Result` carries transport failures, which end the stream; the
/// inner one carries per-frame decode failures, after which decoding goes on.
pub fn decode_stream<S, B, E>(
    bytes: S,
) -> impl Stream<Item = Result<Result<RawFrame, DecodeError>, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        futures_util::pin_mut!(bytes);

        while let Some(read) = bytes.next().await {
            match read {
                Ok(chunk) => {
                    for frame in decoder.feed(chunk.as_ref()) {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }

        decoder.finish();
    }
}
