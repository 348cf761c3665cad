//! HTTP client for a JSON stack control-plane API.
//!
//! | Call | Request | Success |
//! |---|---|---|
//! | describe | `GET /stacks/{name}` | `200` [`StackInfo`], `404` absent |
//! | create | `POST /stacks` | `202 {"operationId"}` |
//! | update | `PUT /stacks/{name}` | `202 {"operationId"}` |
//! | status | `GET /stacks/{name}/operations/{id}` | `200` [`OperationStatus`] |
//!
//! Errors carry `{"code", "message"}`. The role to assume travels in the
//! `x-role-arn` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ControlPlaneConfig;
use crate::error::{ControlPlaneError, DeployError, DeployResult};
use crate::types::{DeployStackContext, OnCreateFailure, Parameter, StackName, Tag};

use super::{ControlPlane, OperationHandle, OperationStatus, StackInfo, UpdateSubmission};

const ROLE_HEADER: &str = "x-role-arn";
const NO_UPDATES_CODE: &str = "NoUpdatesToPerform";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    stack_name: &'a str,
    template_body: &'a str,
    parameters: &'a [Parameter],
    tags: &'a [Tag],
    #[serde(skip_serializing_if = "Option::is_none")]
    stack_policy_body: Option<&'a str>,
    client_request_token: &'a str,
    capabilities: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_target: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    on_failure: Option<OnCreateFailure>,
}

impl<'a> SubmitBody<'a> {
    fn new(context: &'a DeployStackContext, on_failure: Option<OnCreateFailure>) -> Self {
        Self {
            stack_name: context.stack_name.as_str(),
            template_body: &context.template,
            parameters: &context.parameters,
            tags: &context.tags,
            stack_policy_body: context.stack_policy.as_deref(),
            client_request_token: &context.client_request_token,
            capabilities: &context.capabilities,
            notification_target: context.notification_target.as_deref(),
            on_failure,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    operation_id: String,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// HTTP implementation of [`ControlPlane`].
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
}

impl HttpControlPlane {
    /// Create a client from configuration.
    pub fn new(config: &ControlPlaneConfig) -> DeployResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(DeployError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a client with a custom base URL.
    pub fn with_url(url: impl Into<String>) -> DeployResult<Self> {
        Self::new(&ControlPlaneConfig {
            url: url.into(),
            ..ControlPlaneConfig::default()
        })
    }

    async fn send(request: RequestBuilder) -> Result<Response, ControlPlaneError> {
        request
            .send()
            .await
            .map_err(|e| ControlPlaneError::Unavailable(e.to_string()))
    }

    async fn submit(&self, request: RequestBuilder) -> Result<Response, ControlPlaneError> {
        let response = Self::send(request).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Map an unsuccessful response onto the error taxonomy.
async fn error_from_response(response: Response) -> ControlPlaneError {
    let status = response.status();
    let body: ErrorBody = response.json().await.unwrap_or_default();
    classify(status, &body.code, body.message)
}

fn classify(status: StatusCode, code: &str, message: String) -> ControlPlaneError {
    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };

    match (status, code) {
        (_, "Throttling" | "ThrottlingException") | (StatusCode::TOO_MANY_REQUESTS, _) => {
            ControlPlaneError::Throttled(message)
        }
        (_, "ConcurrentModification" | "OperationInProgress") | (StatusCode::CONFLICT, _) => {
            ControlPlaneError::ConcurrentModification(message)
        }
        (_, "AccessDenied") | (StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED, _) => {
            ControlPlaneError::AccessDenied(message)
        }
        (StatusCode::NOT_FOUND, _) => ControlPlaneError::StackNotFound(message),
        (s, _) if s.is_server_error() => ControlPlaneError::Unavailable(message),
        _ => ControlPlaneError::Validation(message),
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn describe(
        &self,
        stack_name: &StackName,
        role_arn: &str,
    ) -> Result<Option<StackInfo>, ControlPlaneError> {
        let url = format!("{}/stacks/{}", self.base_url, stack_name);
        let response = Self::send(self.client.get(&url).header(ROLE_HEADER, role_arn)).await?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map(Some)
                .map_err(|e| ControlPlaneError::Unavailable(e.to_string())),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(error_from_response(response).await),
        }
    }

    async fn create(
        &self,
        context: &DeployStackContext,
    ) -> Result<OperationHandle, ControlPlaneError> {
        let url = format!("{}/stacks", self.base_url);
        let body = SubmitBody::new(context, Some(context.on_create_failure));
        let response = self
            .submit(
                self.client
                    .post(&url)
                    .header(ROLE_HEADER, &context.role_arn)
                    .json(&body),
            )
            .await?;

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ControlPlaneError::Unavailable(e.to_string()))?;
        Ok(OperationHandle::new(submitted.operation_id))
    }

    async fn update(
        &self,
        context: &DeployStackContext,
    ) -> Result<UpdateSubmission, ControlPlaneError> {
        let url = format!("{}/stacks/{}", self.base_url, context.stack_name);
        let body = SubmitBody::new(context, None);
        let response = Self::send(
            self.client
                .put(&url)
                .header(ROLE_HEADER, &context.role_arn)
                .json(&body),
        )
        .await?;

        let status = response.status();
        if status.is_success() {
            let submitted: SubmitResponse = response
                .json()
                .await
                .map_err(|e| ControlPlaneError::Unavailable(e.to_string()))?;
            return Ok(UpdateSubmission::Started(OperationHandle::new(
                submitted.operation_id,
            )));
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        if body.code == NO_UPDATES_CODE {
            return Ok(UpdateSubmission::NoChanges);
        }
        Err(classify(status, &body.code, body.message))
    }

    async fn operation_status(
        &self,
        stack_name: &StackName,
        operation: &OperationHandle,
        role_arn: &str,
    ) -> Result<OperationStatus, ControlPlaneError> {
        let url = format!(
            "{}/stacks/{}/operations/{}",
            self.base_url, stack_name, operation
        );
        let response = self
            .submit(self.client.get(&url).header(ROLE_HEADER, role_arn))
            .await?;

        response
            .json()
            .await
            .map_err(|e| ControlPlaneError::Unavailable(e.to_string()))
    }
}
