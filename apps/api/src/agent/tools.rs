//! Tools the coach may call while answering, and the seam that executes them.
//!
//! Résumé data lives in another service; `HttpToolExecutor` forwards each call
//! there as `POST {base}/tools/{name}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::auth::USER_ID_HEADER;
use crate::llm_client::ToolDefinition;

/// One tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Who the call is made for.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub resume_id: Option<i64>,
    pub thread_id: String,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("{0}")]
    Failed(String),

    #[error("Tool request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Schemas offered to the model on every call.
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Offers no tools; the model answers from the conversation alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn execute(&self, call: &ToolCall, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Err(ToolError::Unknown(call.name.clone()))
    }
}

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// The résumé editing tools.
pub fn coach_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "createResumeCopy",
            "Create a working copy of a resume for editing. Returns the new resume ID.",
            json!({
                "type": "object",
                "properties": {
                    "sourceResumeId": {"type": "number", "description": "The resume to copy"}
                },
                "required": ["sourceResumeId"]
            }),
        ),
        tool(
            "updateAccomplishments",
            "Update the accomplishments list for a specific position in the resume.",
            json!({
                "type": "object",
                "properties": {
                    "positionId": {"type": "number"},
                    "accomplishments": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["positionId", "accomplishments"]
            }),
        ),
        tool(
            "updateSummary",
            "Update the professional summary section of the resume.",
            json!({
                "type": "object",
                "properties": {
                    "resumeId": {"type": "number"},
                    "summary": {"type": "string"}
                },
                "required": ["resumeId", "summary"]
            }),
        ),
        tool(
            "getResume",
            "Fetch complete resume details including all sections, experience, and education.",
            json!({
                "type": "object",
                "properties": {
                    "resumeId": {"type": "number"}
                },
                "required": ["resumeId"]
            }),
        ),
        tool(
            "addExperience",
            "Add a new work experience/position to the resume.",
            json!({
                "type": "object",
                "properties": {
                    "resumeId": {"type": "number"},
                    "companyName": {"type": "string"},
                    "title": {"type": "string"},
                    "startDate": {"type": "string", "description": "Start date, e.g. 2021-03"},
                    "endDate": {"type": "string", "description": "Omit for a current position"},
                    "location": {"type": "string"},
                    "accomplishments": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["resumeId", "companyName", "title", "startDate", "location", "accomplishments"]
            }),
        ),
        tool(
            "updateSkills",
            "Update the skills associated with a specific position.",
            json!({
                "type": "object",
                "properties": {
                    "positionId": {"type": "number"},
                    "skills": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["positionId", "skills"]
            }),
        ),
        tool(
            "fetchJobDescription",
            "Fetch and parse a job description from a URL. Extracts company, title, requirements, and responsibilities.",
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Link to the job posting"}
                },
                "required": ["url"]
            }),
        ),
        tool(
            "listResumes",
            "List all available resumes for the user. Returns resume IDs and names.",
            json!({
                "type": "object",
                "properties": {
                    "userId": {"type": "string", "description": "The user ID to list resumes for"}
                },
                "required": ["userId"]
            }),
        ),
    ]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolRequest<'a> {
    input: &'a Value,
    user_id: &'a str,
    resume_id: Option<i64>,
    thread_id: &'a str,
}

/// Runs the coach tools against the résumé service.
#[derive(Clone)]
pub struct HttpToolExecutor {
    client: Client,
    base_url: String,
    tools: Vec<ToolDefinition>,
}

impl HttpToolExecutor {
    pub fn new(base_url: &str) -> Result<Self, ToolError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            tools: coach_tools(),
        })
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.clone()
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        if !self.tools.iter().any(|t| t.name == call.name) {
            return Err(ToolError::Unknown(call.name.clone()));
        }

        debug!("Calling tool {} for thread {}", call.name, ctx.thread_id);
        let response = self
            .client
            .post(format!("{}/tools/{}", self.base_url, call.name))
            .header(USER_ID_HEADER, &ctx.user_id)
            .json(&ToolRequest {
                input: &call.input,
                user_id: &ctx.user_id,
                resume_id: ctx.resume_id,
                thread_id: &ctx.thread_id,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "Tool {} failed with status {}",
                call.name,
                status.as_u16()
            )));
        }
        Ok(response.json().await?)
    }
}
