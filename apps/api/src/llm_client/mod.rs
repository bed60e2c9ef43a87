//! Streaming access to the Anthropic Messages API.
//!
//! Agent runners reach the model only through `LlmClient`. The model name is
//! fixed in `MODEL` rather than read from config.

pub mod stream;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::chat::{HistoryMessage, Role};

pub use stream::{ModelEvent, ModelStream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all coach turns.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("No messages to send")]
    EmptyConversation,
}

/// A tool the model may call, described by a JSON schema for its input.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ApiMessage {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ApiMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    stream: bool,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// The single LLM client used by all services.
/// Wraps the Anthropic Messages API with retry logic on connect.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    api_url: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()?,
            api_key,
            api_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    /// Points the client at another Messages API endpoint.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Opens one streaming model call over `messages`, offering `tools`.
    ///
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff,
    /// but only before the body starts streaming. Once events flow, a failure
    /// ends the stream with an error item.
    pub async fn stream_turn(
        &self,
        system: &str,
        messages: &[ApiMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelStream, LlmError> {
        if messages.is_empty() {
            return Err(LlmError::EmptyConversation);
        }

        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages,
            tools,
            stream: true,
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.api_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<AnthropicError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            debug!(
                "LLM stream opened (model: {MODEL}, {} tools offered)",
                tools.len()
            );
            return Ok(stream::model_events(response.bytes_stream()));
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

/// Stored turns as API messages. System turns (the system prompt travels
/// separately) and blank turns are dropped.
pub fn history_messages(history: &[HistoryMessage]) -> Vec<ApiMessage> {
    history
        .iter()
        .filter(|m| m.role != Role::System && !m.content.trim().is_empty())
        .map(|m| ApiMessage {
            role: m.role,
            content: vec![ContentBlock::Text {
                text: m.content.clone(),
            }],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_and_blank_turns_are_not_sent() {
        let history = vec![
            HistoryMessage {
                role: Role::System,
                content: "ignored".to_string(),
            },
            HistoryMessage {
                role: Role::User,
                content: "Review my summary".to_string(),
            },
            HistoryMessage {
                role: Role::Assistant,
                content: "  ".to_string(),
            },
        ];
        let messages = history_messages(&history);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_tool_blocks_serialize_in_wire_shape() {
        let message = ApiMessage::user(vec![
            ContentBlock::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                content: "{}".to_string(),
                is_error: false,
            },
            ContentBlock::ToolResult {
                tool_use_id: "toolu_2".to_string(),
                content: "{\"error\":\"boom\"}".to_string(),
                is_error: true,
            },
        ]);
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "role": "user",
                "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "{}"},
                    {"type": "tool_result", "tool_use_id": "toolu_2", "content": "{\"error\":\"boom\"}", "is_error": true},
                ],
            })
        );
    }

    #[test]
    fn test_request_omits_empty_tool_list() {
        let messages = vec![ApiMessage::user(vec![ContentBlock::Text {
            text: "hi".to_string(),
        }])];
        let request = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: "sys",
            messages: &messages,
            tools: &[],
            stream: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["messages"][0]["content"][0]["type"], "text");
    }
}
