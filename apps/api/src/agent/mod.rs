//! Agent runner seam.
//!
//! The chat endpoint only needs an ordered stream of agent events; how the
//! agent reasons, which tools it owns and how it prompts the model stay behind
//! `AgentRunner`. `AppState` carries an `Arc<dyn AgentRunner>`.

pub mod llm;
pub mod prompts;
pub mod tools;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::llm_client::LlmError;
use crate::models::chat::HistoryMessage;

pub use llm::LlmAgentRunner;
pub use tools::{HttpToolExecutor, NoTools, ToolExecutor};

/// Internal events produced while the agent runs one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Incremental model output.
    ModelToken { text: String },
    ToolStart {
        name: String,
        input: Option<Value>,
        run_id: Option<String>,
    },
    ToolEnd {
        name: String,
        output: Option<Value>,
        run_id: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Everything the agent gets for one turn.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub thread_id: String,
    pub user_id: String,
    pub resume_id: Option<i64>,
    /// Prior turns of the thread, oldest first, excluding `message`.
    pub history: Vec<HistoryMessage>,
    pub message: String,
}

pub type AgentEventStream = BoxStream<'static, Result<AgentEvent, AgentError>>;

#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, run: AgentRun) -> Result<AgentEventStream, AgentError>;
}

// ────────────────────────────────────────────────────────────────────────────
// ScriptedAgent
// ────────────────────────────────────────────────────────────────────────────

/// Replays a fixed list of events, optionally paced. A step holding `Err`
/// fails the run at that point.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    steps: Vec<Result<AgentEvent, String>>,
    delay: Option<Duration>,
}

impl ScriptedAgent {
    pub fn new(events: Vec<AgentEvent>) -> Self {
        Self {
            steps: events.into_iter().map(Ok).collect(),
            delay: None,
        }
    }

    /// Stand-in used when no model credentials are configured.
    pub fn unconfigured() -> Self {
        Self::default().then_fail("The coach is not configured on this server")
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.steps.push(Err(message.into()));
        self
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn run(&self, _run: AgentRun) -> Result<AgentEventStream, AgentError> {
        let steps = self.steps.clone();
        let delay = self.delay;

        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match step {
                    Ok(event) => {
                        yield Ok(event);
                    }
                    Err(message) => {
                        yield Err(AgentError::Failed(message));
                        break;
                    }
                }
            }
        }))
    }
}
