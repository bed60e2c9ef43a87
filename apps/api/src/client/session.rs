//! Stream Session: one conversation as a client sees it.
//!
//! The session sends a message, reads the frame stream and folds each frame
//! into its state. UIs read that state through [`StreamSession::snapshot`] or
//! watch it with [`StreamSession::subscribe`]. States are `Idle` and
//! `Sending`; at most one send is outstanding.
//!
//! Every send gets its own cancellation token. Reads race the token, and each
//! state mutation re-checks it while holding the state lock, so nothing from
//! an aborted send lands after `cancel_request` or `reset_chat` returns. A
//! send whose future is dropped part way (a timeout, a lost `select!` branch)
//! is aborted the same way, so the session never stays `Sending`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::thread_id::ThreadIdStore;
use crate::client::tracker::{ToolExecution, ToolTracker};
use crate::client::transport::{ChatTransport, OutgoingMessage};
use crate::client::ClientError;
use crate::models::chat::Role;
use crate::protocol::{decode_stream, DecodeError, StreamFrame};

pub const MALFORMED_FRAME_MESSAGE: &str = "Received a malformed stream frame";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    fn user(content: &str) -> Self {
        Self {
            id: format!("user-{}", Uuid::new_v4()),
            role: Role::User,
            content: content.to_string(),
        }
    }

    fn assistant(content: String) -> Self {
        Self {
            id: format!("assistant-{}", Uuid::new_v4()),
            role: Role::Assistant,
            content,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Sending,
}

/// What a UI renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub messages: Vec<ChatMessage>,
    /// Assistant text streamed so far in the current turn.
    pub current_chunk: String,
    pub tool_executions: Vec<ToolExecution>,
    /// Executions still waiting for their `tool_end`.
    pub active_tools: Vec<ToolExecution>,
    pub error: Option<String>,
    pub thread_id: Option<String>,
}

impl SessionSnapshot {
    pub fn is_loading(&self) -> bool {
        self.status == SessionStatus::Sending
    }
}

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    messages: Vec<ChatMessage>,
    accumulator: String,
    tools: ToolTracker,
    error: Option<String>,
    thread_id: Option<String>,
    cancel: Option<CancellationToken>,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            messages: self.messages.clone(),
            current_chunk: self.accumulator.clone(),
            tool_executions: self.tools.executions().to_vec(),
            active_tools: self.tools.active().cloned().collect(),
            error: self.error.clone(),
            thread_id: self.thread_id.clone(),
        }
    }

    fn begin_turn(&mut self, text: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.status = SessionStatus::Sending;
        self.error = None;
        self.accumulator.clear();
        self.tools.clear();
        self.messages.push(ChatMessage::user(text));
        self.cancel = Some(token.clone());
        token
    }

    /// Folds one frame into the state. Returns the thread id when a `done`
    /// frame carries one the session did not hold. The server's id always
    /// wins: a saved id it no longer recognises is replaced rather than sent
    /// again on every turn.
    fn dispatch_frame(&mut self, frame: StreamFrame) -> Option<String> {
        match frame {
            StreamFrame::Chunk(chunk) => self.accumulator.push_str(&chunk.content),
            StreamFrame::ToolStart(start) => {
                self.tools.start(start.tool, start.input, start.run_id);
            }
            StreamFrame::ToolEnd(end) => {
                if self
                    .tools
                    .end(&end.tool, end.output, end.run_id.as_deref())
                    .is_none()
                {
                    debug!("Dropping tool_end for {} with no running execution", end.tool);
                }
            }
            StreamFrame::Done(done) => {
                if let Some(thread_id) = done.thread_id.filter(|id| !id.is_empty()) {
                    if self.thread_id.as_deref() != Some(thread_id.as_str()) {
                        self.thread_id = Some(thread_id.clone());
                        return Some(thread_id);
                    }
                }
            }
            StreamFrame::Error(error) => self.error = Some(error.message),
        }
        None
    }

    fn record_decode_error(&mut self, error: &DecodeError) {
        warn!("Skipping frame: {error}");
        self.error = Some(MALFORMED_FRAME_MESSAGE.to_string());
    }

    /// Closes the turn once the stream has ended on its own or failed.
    fn finish_turn(&mut self, outcome: Result<(), ClientError>) {
        match outcome {
            Ok(()) if !self.accumulator.is_empty() => {
                let content = std::mem::take(&mut self.accumulator);
                self.messages.push(ChatMessage::assistant(content));
            }
            Ok(()) => {}
            Err(e) => self.error = Some(e.to_string()),
        }
        self.accumulator.clear();
        self.tools.clear();
        self.status = SessionStatus::Idle;
        self.cancel = None;
    }

    /// Cancels the outstanding send, if any, discarding its partial output.
    fn abort_turn(&mut self) -> bool {
        let Some(token) = self.cancel.take() else {
            return false;
        };
        token.cancel();
        self.accumulator.clear();
        self.tools.clear();
        self.status = SessionStatus::Idle;
        true
    }
}

/// Aborts the turn if `send_message` is dropped before it finishes.
struct TurnGuard<'a> {
    session: &'a StreamSession,
    token: CancellationToken,
    armed: bool,
}

impl TurnGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.session.lock();
        if !self.token.is_cancelled() && state.abort_turn() {
            debug!("Send dropped before its stream ended");
            self.session.publish(&state);
        }
    }
}

pub type ThreadCreatedCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub struct StreamSession {
    transport: Arc<dyn ChatTransport>,
    thread_ids: Arc<dyn ThreadIdStore>,
    resume_id: Option<i64>,
    on_thread_created: Option<ThreadCreatedCallback>,
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl StreamSession {
    /// Creates a session, resuming the thread remembered by `thread_ids`.
    pub fn new(transport: Arc<dyn ChatTransport>, thread_ids: Arc<dyn ThreadIdStore>) -> Self {
        let thread_id = thread_ids.load().unwrap_or_else(|e| {
            warn!("Could not load the saved thread id: {e}");
            None
        });
        let state = SessionState {
            thread_id,
            ..SessionState::default()
        };
        let (snapshots, _) = watch::channel(state.snapshot());

        Self {
            transport,
            thread_ids,
            resume_id: None,
            on_thread_created: None,
            state: Mutex::new(state),
            snapshots,
        }
    }

    /// Sends `resumeId` with every message so the agent works on that résumé.
    pub fn with_resume_id(mut self, resume_id: i64) -> Self {
        self.resume_id = Some(resume_id);
        self
    }

    /// Called when the server assigns this session a thread it did not hold,
    /// including one that replaces a stale saved id.
    pub fn on_thread_created(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_thread_created = Some(Arc::new(callback));
        self
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Sends one user message and reads the reply stream to its end.
    ///
    /// Does nothing when `text` is blank or another send is in flight.
    /// Failures are reported through the snapshot's `error`, never returned.
    pub async fn send_message(&self, text: &str) {
        let (token, request) = {
            let mut state = self.lock();
            if text.trim().is_empty() || state.status == SessionStatus::Sending {
                debug!("Ignoring send: blank message or a send already in flight");
                return;
            }
            let token = state.begin_turn(text);
            let request = OutgoingMessage {
                message: text.to_string(),
                thread_id: state.thread_id.clone(),
                resume_id: self.resume_id,
            };
            self.publish(&state);
            (token, request)
        };

        let mut guard = TurnGuard {
            session: self,
            token: token.clone(),
            armed: true,
        };
        let outcome = self.read_turn(&token, request).await;
        guard.disarm();

        let mut state = self.lock();
        if token.is_cancelled() {
            return;
        }
        if let Err(e) = &outcome {
            warn!("Chat request failed: {e}");
        }
        state.finish_turn(outcome);
        self.publish(&state);
    }

    /// Aborts the outstanding send. Partial output is discarded and no error
    /// is recorded.
    pub fn cancel_request(&self) {
        let mut state = self.lock();
        if state.abort_turn() {
            info!("Chat request cancelled");
            self.publish(&state);
        }
    }

    /// Starts over: cancels any send, clears the conversation and forgets the
    /// thread so the next message opens a new one.
    pub fn reset_chat(&self) {
        let mut state = self.lock();
        state.abort_turn();
        state.messages.clear();
        state.error = None;
        state.thread_id = None;
        if let Err(e) = self.thread_ids.clear() {
            warn!("Could not clear the saved thread id: {e}");
        }
        self.publish(&state);
    }

    async fn read_turn(
        &self,
        token: &CancellationToken,
        request: OutgoingMessage,
    ) -> Result<(), ClientError> {
        let bytes = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            opened = self.transport.open(request) => opened?,
        };

        let frames = decode_stream(bytes);
        futures_util::pin_mut!(frames);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                next = frames.next() => next,
            };
            match next {
                None => return Ok(()),
                Some(Err(e)) => return Err(e),
                Some(Ok(decoded)) => self.apply(token, decoded.and_then(StreamFrame::parse)),
            }
        }
    }

    fn apply(&self, token: &CancellationToken, parsed: Result<Option<StreamFrame>, DecodeError>) {
        let created = {
            let mut state = self.lock();
            if token.is_cancelled() {
                return;
            }
            let created = match parsed {
                Ok(Some(frame)) => state.dispatch_frame(frame),
                Ok(None) => return,
                Err(e) => {
                    state.record_decode_error(&e);
                    None
                }
            };
            if let Some(thread_id) = &created {
                if let Err(e) = self.thread_ids.save(thread_id) {
                    warn!("Could not save thread id {thread_id}: {e}");
                }
            }
            self.publish(&state);
            created
        };

        if let Some(thread_id) = created {
            info!("Chat thread is now {thread_id}");
            if let Some(callback) = &self.on_thread_created {
                callback(&thread_id);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SessionState) {
        self.snapshots.send_replace(state.snapshot());
    }
}
