//! Agent runner backed by the streaming Messages API.
//!
//! Each round streams one model call. Tool calls the model makes are surfaced
//! as tool events, executed through the `ToolExecutor`, and their results fed
//! back for another round until the model answers without calling a tool.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tracing::{info, warn};

use crate::agent::prompts::{COACH_SYSTEM, RESUME_CONTEXT_TEMPLATE};
use crate::agent::tools::{ToolCall, ToolContext, ToolExecutor};
use crate::agent::{AgentError, AgentEvent, AgentEventStream, AgentRun, AgentRunner};
use crate::llm_client::{
    history_messages, ApiMessage, ContentBlock, LlmClient, ModelEvent, ModelStream,
    ToolDefinition,
};
use crate::models::chat::{HistoryMessage, Role};

/// Model calls allowed in one turn before it is failed.
pub const MAX_TOOL_ROUNDS: usize = 8;

pub struct LlmAgentRunner {
    llm: LlmClient,
    tools: Arc<dyn ToolExecutor>,
}

impl LlmAgentRunner {
    pub fn new(llm: LlmClient, tools: Arc<dyn ToolExecutor>) -> Self {
        Self { llm, tools }
    }
}

#[async_trait]
impl AgentRunner for LlmAgentRunner {
    async fn run(&self, run: AgentRun) -> Result<AgentEventStream, AgentError> {
        info!(
            "Starting coach run on thread {} ({} prior messages)",
            run.thread_id,
            run.history.len()
        );

        let system = build_system_prompt(run.resume_id);
        let messages = history_messages(&conversation(run.history, run.message));
        let definitions = self.tools.definitions();
        let first = self.llm.stream_turn(&system, &messages, &definitions).await?;

        Ok(tool_loop(
            TurnLoop {
                llm: self.llm.clone(),
                tools: self.tools.clone(),
                definitions,
                system,
                messages,
                ctx: ToolContext {
                    user_id: run.user_id,
                    resume_id: run.resume_id,
                    thread_id: run.thread_id,
                },
            },
            first,
        ))
    }
}

struct TurnLoop {
    llm: LlmClient,
    tools: Arc<dyn ToolExecutor>,
    definitions: Vec<ToolDefinition>,
    system: String,
    messages: Vec<ApiMessage>,
    ctx: ToolContext,
}

fn tool_loop(mut turn: TurnLoop, first: ModelStream) -> AgentEventStream {
    Box::pin(async_stream::stream! {
        let mut model = first;
        let mut round = 1;

        loop {
            let mut text = String::new();
            let mut calls = Vec::new();

            while let Some(event) = model.next().await {
                match event {
                    Ok(ModelEvent::Text(delta)) => {
                        text.push_str(&delta);
                        yield Ok(AgentEvent::ModelToken { text: delta });
                    }
                    Ok(ModelEvent::ToolUse { id, name, input }) => {
                        yield Ok(AgentEvent::ToolStart {
                            name: name.clone(),
                            input: Some(input.clone()),
                            run_id: Some(id.clone()),
                        });
                        calls.push(ToolCall { id, name, input });
                    }
                    Err(e) => {
                        yield Err(AgentError::from(e));
                        return;
                    }
                }
            }

            if calls.is_empty() {
                return;
            }
            if round >= MAX_TOOL_ROUNDS {
                warn!("Thread {} hit the tool round limit", turn.ctx.thread_id);
                yield Err(AgentError::Failed(
                    "The coach needed too many tool calls to answer".to_string(),
                ));
                return;
            }

            let mut assistant = Vec::new();
            if !text.is_empty() {
                assistant.push(ContentBlock::Text { text });
            }
            let mut results = Vec::new();

            for call in calls {
                let (output, is_error) = match turn.tools.execute(&call, &turn.ctx).await {
                    Ok(output) => (output, false),
                    Err(e) => {
                        warn!("Tool {} failed: {e}", call.name);
                        (json!({ "error": e.to_string() }), true)
                    }
                };

                yield Ok(AgentEvent::ToolEnd {
                    name: call.name.clone(),
                    output: Some(output.clone()),
                    run_id: Some(call.id.clone()),
                });

                results.push(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content: output.to_string(),
                    is_error,
                });
                assistant.push(ContentBlock::ToolUse {
                    id: call.id,
                    name: call.name,
                    input: call.input,
                });
            }

            turn.messages.push(ApiMessage::assistant(assistant));
            turn.messages.push(ApiMessage::user(results));
            round += 1;

            model = match turn
                .llm
                .stream_turn(&turn.system, &turn.messages, &turn.definitions)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    yield Err(AgentError::from(e));
                    return;
                }
            };
        }
    })
}

fn build_system_prompt(resume_id: Option<i64>) -> String {
    match resume_id {
        Some(id) => format!(
            "{COACH_SYSTEM}\n\n{}",
            RESUME_CONTEXT_TEMPLATE.replace("{resume_id}", &id.to_string())
        ),
        None => COACH_SYSTEM.to_string(),
    }
}

fn conversation(mut history: Vec<HistoryMessage>, message: String) -> Vec<HistoryMessage> {
    history.push(HistoryMessage {
        role: Role::User,
        content: message,
    });
    history
}
