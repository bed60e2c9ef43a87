//! Client half of the chat stream: sends a message, decodes the response and
//! keeps a snapshot of the conversation that a UI can render.

pub mod session;
pub mod thread_id;
pub mod tracker;
pub mod transport;

pub use session::{ChatMessage, SessionSnapshot, SessionStatus, StreamSession};
pub use thread_id::{FileThreadIdStore, MemoryThreadIdStore, ThreadIdStore};
pub use tracker::{ToolExecution, ToolStatus, ToolTracker};
pub use transport::{ByteStream, ChatTransport, HttpChatTransport, OutgoingMessage};

use thiserror::Error;

/// Failures surfaced to the user through the session's error field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("Please sign in to use the chat")]
    AuthRequired,

    #[error("HTTP error! status: {0}")]
    Status(u16),

    #[error("Connection to the chat server failed: {0}")]
    Transport(String),
}
