//! Create-or-update reconciliation against the control plane.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::DeploymentConfig;
use crate::error::ControlPlaneError;
use crate::retry::{retry, RetryPolicy};
use crate::stack::{ControlPlane, OperationHandle, OperationStatus, StackReader, UpdateSubmission};
use crate::state::{Converging, Reconciled, Reconciliation};
use crate::types::DeployStackContext;

/// Drives one stack to the submitted template and classifies the result.
///
/// The control plane performs its own diff, so there is no plan step:
/// the stack is created if absent and updated otherwise. An update the
/// control plane reports as a no-op ends in [`Reconciled::NoChangesNeeded`].
pub struct DeployReconciler {
    control_plane: Arc<dyn ControlPlane>,
    reader: StackReader,
    retry: RetryPolicy,
    poll_interval: Duration,
    convergence_timeout: Duration,
}

impl DeployReconciler {
    /// Create a new reconciler.
    #[must_use]
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        retry: RetryPolicy,
        config: &DeploymentConfig,
    ) -> Self {
        Self {
            reader: StackReader::new(Arc::clone(&control_plane), retry),
            control_plane,
            retry,
            poll_interval: config.poll_interval(),
            convergence_timeout: config.convergence_timeout(),
        }
    }

    /// The reader used for existence checks and outputs.
    #[must_use]
    pub const fn reader(&self) -> &StackReader {
        &self.reader
    }

    /// Reconcile the stack described by `context`.
    ///
    /// Never fails: every error ends in [`Reconciled::Failed`] carrying the
    /// error message.
    pub async fn reconcile(&self, context: &DeployStackContext) -> Reconciled {
        let stack = &context.stack_name;
        let idle = Reconciliation::start(stack.clone(), context.client_request_token.clone());

        let exists = match self.reader.exists(stack, &context.role_arn).await {
            Ok(exists) => exists,
            Err(e) => return idle.fail(e.to_string()).into(),
        };

        let (converging, operation) = if exists {
            match self.submit_update(context).await {
                Ok(UpdateSubmission::Started(operation)) => {
                    info!(stack = %stack, operation = %operation, "stack update started");
                    (idle.updated(operation.clone()).converge(), operation)
                }
                Ok(UpdateSubmission::NoChanges) => {
                    info!(stack = %stack, "stack already up to date");
                    return idle.no_changes().into();
                }
                Err(e) => return idle.fail(e.to_string()).into(),
            }
        } else {
            match self.submit_create(context).await {
                Ok(operation) => {
                    info!(stack = %stack, operation = %operation, "stack create started");
                    (idle.created(operation.clone()).converge(), operation)
                }
                Err(e) => return idle.fail(e.to_string()).into(),
            }
        };

        self.converge(converging, &operation, &context.role_arn).await
    }

    async fn submit_create(
        &self,
        context: &DeployStackContext,
    ) -> Result<OperationHandle, ControlPlaneError> {
        retry(
            &self.retry,
            "create_stack",
            ControlPlaneError::is_transient,
            || self.control_plane.create(context),
        )
        .await
    }

    async fn submit_update(
        &self,
        context: &DeployStackContext,
    ) -> Result<UpdateSubmission, ControlPlaneError> {
        retry(
            &self.retry,
            "update_stack",
            ControlPlaneError::is_transient,
            || self.control_plane.update(context),
        )
        .await
    }

    async fn converge(
        &self,
        converging: Reconciliation<Converging>,
        operation: &OperationHandle,
        role_arn: &str,
    ) -> Reconciled {
        let stack = converging.data().stack_name.clone();

        let waited = tokio::time::timeout(
            self.convergence_timeout,
            self.wait_for_operation(&converging, operation, role_arn),
        )
        .await;

        let error = match waited {
            Ok(Ok(())) => match self.reader.converged_outputs(&stack, role_arn).await {
                Ok(outputs) => {
                    let elapsed = converging.data().started_at.elapsed();
                    info!(
                        stack = %stack,
                        outputs = outputs.len(),
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "stack converged"
                    );
                    return converging.converged(outputs).into();
                }
                Err(e) => e.to_string(),
            },
            Ok(Err(cause)) => cause,
            Err(_) => ControlPlaneError::Timeout {
                stack: stack.to_string(),
                secs: self.convergence_timeout.as_secs(),
            }
            .to_string(),
        };

        warn!(stack = %stack, operation = %operation, error = %error, "stack did not converge");
        converging.fail(error).into()
    }

    /// Poll until the operation finishes. `Err` carries the failure cause.
    ///
    /// The operation was accepted, so a missing stack is a lagging read and
    /// is retried within the policy.
    async fn wait_for_operation(
        &self,
        converging: &Reconciliation<Converging>,
        operation: &OperationHandle,
        role_arn: &str,
    ) -> Result<(), String> {
        let stack = &converging.data().stack_name;
        loop {
            let status = retry(
                &self.retry,
                "describe_operation",
                ControlPlaneError::is_transient_after_submit,
                || self.control_plane.operation_status(stack, operation, role_arn),
            )
            .await
            .map_err(|e| e.to_string())?;

            match status {
                OperationStatus::InProgress => {
                    debug!(stack = %stack, operation = %operation, "waiting for stack operation");
                    tokio::time::sleep(self.poll_interval).await;
                }
                OperationStatus::Succeeded => return Ok(()),
                OperationStatus::Failed { reason } => return Err(reason),
            }
        }
    }
}
