//! HTTP client for the workflow engine's task callback API.
//!
//! `POST /tasks/success` with `{"taskToken", "output"}` and
//! `POST /tasks/failure` with `{"taskToken", "error", "cause"}`.
//! Rejections come back as `{"code", "message"}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::WorkflowConfig;
use crate::error::{DeployError, DeployResult, WorkflowError};
use crate::types::TaskToken;

use super::WorkflowClient;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessBody<'a> {
    task_token: &'a str,
    output: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailureBody<'a> {
    task_token: &'a str,
    error: &'a str,
    cause: &'a str,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP implementation of [`WorkflowClient`].
#[derive(Debug, Clone)]
pub struct HttpWorkflowClient {
    client: Client,
    base_url: String,
}

impl HttpWorkflowClient {
    /// Create a client from configuration.
    pub fn new(config: &WorkflowConfig) -> DeployResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(DeployError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(), WorkflowError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| WorkflowError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        Err(classify(status, &body.code, body.message))
    }
}

fn classify(status: StatusCode, code: &str, message: String) -> WorkflowError {
    match (status, code) {
        (_, "TaskTimedOut") => WorkflowError::TaskTimedOut,
        (_, "TaskTokenConsumed" | "TaskAlreadyClosed") | (StatusCode::CONFLICT, _) => {
            WorkflowError::TaskTokenConsumed
        }
        (_, "InvalidToken" | "TaskDoesNotExist") | (StatusCode::NOT_FOUND, _) => {
            WorkflowError::InvalidToken(message)
        }
        (s, _) if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            WorkflowError::Unavailable(format!("{status}: {message}"))
        }
        _ => WorkflowError::InvalidToken(message),
    }
}

#[async_trait]
impl WorkflowClient for HttpWorkflowClient {
    async fn send_success(&self, token: &TaskToken, output: &Value) -> Result<(), WorkflowError> {
        self.post(
            "/tasks/success",
            &SuccessBody {
                task_token: token.as_str(),
                output,
            },
        )
        .await
    }

    async fn send_failure(
        &self,
        token: &TaskToken,
        error: &str,
        cause: &str,
    ) -> Result<(), WorkflowError> {
        self.post(
            "/tasks/failure",
            &FailureBody {
                task_token: token.as_str(),
                error,
                cause,
            },
        )
        .await
    }
}
