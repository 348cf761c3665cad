//! Resuming the durable workflow that is waiting on a deployment.
//!
//! Each request carries a task token. The workflow is resumed with exactly
//! one success or failure signal for that token; the engine rejects later
//! resumes, and such a rejection is logged rather than treated as a failure.

mod http;
mod memory;

pub use http::HttpWorkflowClient;
pub use memory::{MemoryWorkflowClient, Signal};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::redact::truncate;
use crate::retry::{retry, RetryPolicy};
use crate::types::{DeploymentOutcome, StackOutputs, TaskToken};

/// Maximum failure cause length accepted by the workflow engine.
pub const CAUSE_LIMIT: usize = 32_768;

/// Error code sent with every failure signal.
pub const FAILURE_ERROR: &str = "DeploymentFailed";

/// Client for the durable workflow engine.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Resume the task as succeeded with a JSON payload.
    async fn send_success(&self, token: &TaskToken, output: &Value) -> Result<(), WorkflowError>;

    /// Resume the task as failed.
    async fn send_failure(
        &self,
        token: &TaskToken,
        error: &str,
        cause: &str,
    ) -> Result<(), WorkflowError>;
}

/// What happened to a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyAck {
    /// The engine accepted the signal.
    Delivered,
    /// The engine refused the token (already consumed, expired or unknown).
    Rejected(WorkflowError),
    /// The engine could not be reached within the retry budget.
    Undelivered(WorkflowError),
}

/// Maps deployment outcomes onto workflow signals.
#[derive(Clone)]
pub struct WorkflowNotifier {
    client: Arc<dyn WorkflowClient>,
    retry: RetryPolicy,
}

impl WorkflowNotifier {
    /// Create a new notifier.
    #[must_use]
    pub fn new(client: Arc<dyn WorkflowClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Send the single terminal signal for `outcome`.
    ///
    /// Never fails: delivery problems are logged and reported in the ack.
    pub async fn notify(&self, token: &TaskToken, outcome: &DeploymentOutcome) -> NotifyAck {
        let mut attempts = 0_u32;
        let result = match outcome {
            DeploymentOutcome::Success { outputs } | DeploymentOutcome::NoChanges { outputs } => {
                let payload = success_payload(outputs);
                retry(&self.retry, "send_task_success", is_retryable, || {
                    attempts += 1;
                    self.client.send_success(token, &payload)
                })
                .await
            }
            DeploymentOutcome::Failure { cause } => {
                let cause = truncate(cause, CAUSE_LIMIT);
                retry(&self.retry, "send_task_failure", is_retryable, || {
                    attempts += 1;
                    self.client.send_failure(token, FAILURE_ERROR, &cause)
                })
                .await
            }
        };

        match result {
            Ok(()) => {
                info!(%token, outcome = %outcome, "workflow resumed");
                NotifyAck::Delivered
            }
            Err(WorkflowError::TaskTokenConsumed) if attempts > 1 => {
                info!(
                    %token,
                    outcome = %outcome,
                    attempts,
                    "workflow resumed by an earlier attempt whose response was lost"
                );
                NotifyAck::Delivered
            }
            Err(e) if e.is_rejection() => {
                warn!(%token, outcome = %outcome, error = %e, "workflow rejected task token");
                NotifyAck::Rejected(e)
            }
            Err(e) => {
                warn!(%token, outcome = %outcome, error = %e, "failed to resume workflow");
                NotifyAck::Undelivered(e)
            }
        }
    }
}

impl fmt::Debug for WorkflowNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowNotifier")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Only `Unavailable` is retried. It also covers a lost response to a signal
/// the engine already accepted; the retry then sees `TaskTokenConsumed`,
/// which [`WorkflowNotifier::notify`] treats as delivered.
const fn is_retryable(e: &WorkflowError) -> bool {
    !e.is_rejection()
}

fn success_payload(outputs: &StackOutputs) -> Value {
    Value::Object(
        outputs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}
