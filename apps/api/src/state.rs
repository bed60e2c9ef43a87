use std::sync::Arc;

use crate::agent::AgentRunner;
use crate::chat::threads::ThreadStore;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Pluggable thread store. Postgres when `DATABASE_URL` is set, in-memory otherwise.
    pub threads: Arc<dyn ThreadStore>,
    /// Pluggable agent runner. Default: `LlmAgentRunner`.
    pub agent: Arc<dyn AgentRunner>,
    pub config: Config,
}
