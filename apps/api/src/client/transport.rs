//! HTTP side of the client: opens a chat turn and hands back the raw body.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::auth::USER_ID_HEADER;
use crate::client::ClientError;

/// Body of `POST /api/v1/chat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_id: Option<i64>,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Starts a turn and returns the response body as it arrives. Dropping the
/// returned stream aborts the request.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, request: OutgoingMessage) -> Result<ByteStream, ClientError>;
}

pub struct HttpChatTransport {
    client: reqwest::Client,
    endpoint: String,
    user_id: Option<String>,
}

impl HttpChatTransport {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/v1/chat", base_url.trim_end_matches('/')),
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(&self, request: OutgoingMessage) -> Result<ByteStream, ClientError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("accept", "text/event-stream")
            .json(&request);
        if let Some(user_id) = &self.user_id {
            builder = builder.header(USER_ID_HEADER, user_id.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        check_status(response.status())?;
        debug!("Chat stream opened against {}", self.endpoint);

        Ok(Box::pin(response.bytes_stream().map(|read| {
            read.map_err(|e| ClientError::Transport(e.to_string()))
        })))
    }
}

fn check_status(status: StatusCode) -> Result<(), ClientError> {
    if status == StatusCode::UNAUTHORIZED {
        Err(ClientError::AuthRequired)
    } else if !status.is_success() {
        Err(ClientError::Status(status.as_u16()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_omits_absent_fields() {
        let body = OutgoingMessage {
            message: "Review my summary".to_string(),
            thread_id: None,
            resume_id: None,
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"message": "Review my summary"})
        );

        let body = OutgoingMessage {
            message: "again".to_string(),
            thread_id: Some("T1".to_string()),
            resume_id: Some(4),
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"message": "again", "threadId": "T1", "resumeId": 4})
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert_eq!(
            check_status(StatusCode::UNAUTHORIZED),
            Err(ClientError::AuthRequired)
        );
        assert_eq!(
            check_status(StatusCode::INTERNAL_SERVER_ERROR).unwrap_err().to_string(),
            "HTTP error! status: 500"
        );
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        assert_eq!(
            HttpChatTransport::new("http://localhost:8080/").endpoint(),
            "http://localhost:8080/api/v1/chat"
        );
    }
}
