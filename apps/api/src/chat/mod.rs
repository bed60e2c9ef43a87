// Streaming chat: thread resolution, the background agent turn, and framing
// of agent events onto the response body.

pub mod emitter;
pub mod handlers;
pub mod threads;
