//! Axum route handler for the streaming chat endpoint.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Response,
    Json,
};
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde::Deserialize;
use tracing::{error, info};

use crate::agent::AgentRun;
use crate::auth::AuthenticatedUser;
use crate::chat::emitter::{sse_response, EmitOutcome, EventEmitter};
use crate::chat::threads::resolve_thread;
use crate::errors::AppError;
use crate::models::chat::{ChatMessageRow, ChatThread, HistoryMessage, Role};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub resume_id: Option<i64>,
}

/// POST /api/v1/chat
///
/// Resolves the thread, then hands the turn to a background task and returns
/// the event stream immediately. Frames reach the client as the agent
/// produces them.
pub async fn handle_chat(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    let message = match request.message {
        Some(message) if !message.trim().is_empty() => message,
        _ => return Err(AppError::Validation("Message is required".to_string())),
    };

    let thread = resolve_thread(
        state.threads.as_ref(),
        request.thread_id.as_deref(),
        &user.id,
        request.resume_id,
    )
    .await?;

    let (emitter, rx) = EventEmitter::channel(state.config.chat_channel_capacity);
    let resume_id = thread.resume_id.or(request.resume_id);

    tokio::spawn(run_turn(state, thread, user.id, resume_id, message, emitter));

    Ok(sse_response(rx))
}

/// Sent when the turn dies without a usable error.
const UNKNOWN_ERROR: &str = "Unknown error";

/// Drives one turn to completion. Every path ends by consuming the emitter,
/// which closes the response body. A panic in the agent still ends the body
/// with an `error` frame.
async fn run_turn(
    state: AppState,
    thread: ChatThread,
    user_id: String,
    resume_id: Option<i64>,
    message: String,
    emitter: EventEmitter,
) {
    info!("Chat turn started on thread {} for user {}", thread.id, user_id);

    let history = match record_user_message(&state, &thread, &message).await {
        Ok(history) => history,
        Err(e) => {
            error!("Failed to record user message on thread {}: {e}", thread.id);
            emitter.fail("Failed to save your message").await;
            return;
        }
    };

    let run = AgentRun {
        thread_id: thread.id.clone(),
        user_id,
        resume_id,
        history,
        message,
    };

    let agent = state.agent.clone();
    let thread_id = thread.id.clone();
    let fallback_tx = emitter.sender();
    let turn = async move {
        let events = match agent.run(run).await {
            Ok(events) => events,
            Err(e) => return emitter.fail(&e.to_string()).await,
        };
        emitter.emit(&thread_id, events).await
    };

    let outcome = match AssertUnwindSafe(turn).catch_unwind().await {
        Ok(outcome) => {
            drop(fallback_tx);
            outcome
        }
        Err(_) => {
            error!("Chat turn on thread {} panicked", thread.id);
            EventEmitter::new(fallback_tx).fail(UNKNOWN_ERROR).await
        }
    };

    match outcome {
        EmitOutcome::Completed { assistant_text } => {
            if !assistant_text.is_empty() {
                if let Err(e) = state
                    .threads
                    .append_message(&thread.id, Role::Assistant, &assistant_text)
                    .await
                {
                    error!("Failed to store assistant reply on thread {}: {e}", thread.id);
                }
            }
            info!("Chat turn completed on thread {}", thread.id);
        }
        EmitOutcome::Failed { message } => {
            info!("Chat turn on thread {} ended with error: {message}", thread.id);
        }
        EmitOutcome::Disconnected => {
            info!("Chat turn on thread {} abandoned by client", thread.id);
        }
    }
}

/// Loads the thread's prior messages, then stores the new user message.
async fn record_user_message(
    state: &AppState,
    thread: &ChatThread,
    message: &str,
) -> Result<Vec<HistoryMessage>, AppError> {
    let prior = state.threads.list_messages(&thread.id).await?;
    state
        .threads
        .append_message(&thread.id, Role::User, message)
        .await?;
    Ok(prior.iter().filter_map(ChatMessageRow::to_history).collect())
}
