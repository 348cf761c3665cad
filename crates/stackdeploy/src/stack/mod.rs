//! Stack control plane access.
//!
//! [`ControlPlane`] is the raw client boundary. [`StackReader`] layers
//! existence checks, output lookup and transient-error retries on top of it.

mod http;
mod memory;

pub use http::HttpControlPlane;
pub use memory::{Call, MemoryControlPlane, Submission, SubmissionKind};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ControlPlaneError;
use crate::retry::{retry, RetryPolicy};
use crate::types::{DeployStackContext, StackName, StackOutputs};

/// Identifier of an asynchronous create or update accepted by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(String);

impl OperationHandle {
    /// Create a new handle.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the handle as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current description of a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackInfo {
    /// Stack name.
    pub name: StackName,
    /// Control-plane status string (e.g. `UPDATE_COMPLETE`).
    pub status: String,
    /// Stack outputs.
    #[serde(default)]
    pub outputs: StackOutputs,
}

/// Result of submitting an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSubmission {
    /// The update was accepted and is running.
    Started(OperationHandle),
    /// The submitted template and parameters match the applied ones.
    NoChanges,
}

/// Progress of a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    /// Still converging.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished unsuccessfully.
    Failed {
        /// Control-plane supplied reason.
        reason: String,
    },
}

/// Client for the stack control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Describe a stack. Returns `None` if it does not exist.
    async fn describe(
        &self,
        stack_name: &StackName,
        role_arn: &str,
    ) -> Result<Option<StackInfo>, ControlPlaneError>;

    /// Submit a create.
    async fn create(
        &self,
        context: &DeployStackContext,
    ) -> Result<OperationHandle, ControlPlaneError>;

    /// Submit an update.
    async fn update(
        &self,
        context: &DeployStackContext,
    ) -> Result<UpdateSubmission, ControlPlaneError>;

    /// Poll a submitted operation.
    async fn operation_status(
        &self,
        stack_name: &StackName,
        operation: &OperationHandle,
        role_arn: &str,
    ) -> Result<OperationStatus, ControlPlaneError>;
}

/// Reads stack state with transient-error retries.
#[derive(Clone)]
pub struct StackReader {
    control_plane: Arc<dyn ControlPlane>,
    retry: RetryPolicy,
}

impl StackReader {
    /// Create a new reader.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, retry: RetryPolicy) -> Self {
        Self {
            control_plane,
            retry,
        }
    }

    /// Describe a stack, retrying transient errors.
    pub async fn describe(
        &self,
        stack_name: &StackName,
        role_arn: &str,
    ) -> Result<Option<StackInfo>, ControlPlaneError> {
        retry(
            &self.retry,
            "describe_stack",
            ControlPlaneError::is_transient,
            || self.control_plane.describe(stack_name, role_arn),
        )
        .await
    }

    /// Whether the stack exists.
    pub async fn exists(
        &self,
        stack_name: &StackName,
        role_arn: &str,
    ) -> Result<bool, ControlPlaneError> {
        Ok(self.describe(stack_name, role_arn).await?.is_some())
    }

    /// Current stack outputs.
    ///
    /// Fails with [`ControlPlaneError::StackNotFound`] if the stack is absent.
    pub async fn outputs(
        &self,
        stack_name: &StackName,
        role_arn: &str,
    ) -> Result<StackOutputs, ControlPlaneError> {
        self.describe(stack_name, role_arn)
            .await?
            .map(|info| info.outputs)
            .ok_or_else(|| ControlPlaneError::StackNotFound(stack_name.to_string()))
    }

    /// Outputs of a stack that just converged.
    ///
    /// A missing stack is retried like a transient error, since the read can
    /// race the write that created it.
    pub async fn converged_outputs(
        &self,
        stack_name: &StackName,
        role_arn: &str,
    ) -> Result<StackOutputs, ControlPlaneError> {
        retry(
            &self.retry,
            "describe_converged_stack",
            ControlPlaneError::is_transient_after_submit,
            || async move {
                self.control_plane
                    .describe(stack_name, role_arn)
                    .await?
                    .map(|info| info.outputs)
                    .ok_or_else(|| ControlPlaneError::StackNotFound(stack_name.to_string()))
            },
        )
        .await
    }
}

impl fmt::Debug for StackReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackReader")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
