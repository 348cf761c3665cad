//! Top-level handling of one deployment request.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{error, info};

use crate::artifact::ArtifactStore;
use crate::config::DeploymentConfig;
use crate::error::{DeployError, DeployResult};
use crate::parameters;
use crate::retry::RetryPolicy;
use crate::stack::ControlPlane;
use crate::state::Reconciled;
use crate::status::{CommitStatusReporter, StatusTarget};
use crate::template_config::ConfigParser;
use crate::token::TokenGenerator;
use crate::types::{DeployStackContext, DeploymentOutcome, DeploymentRequest, OnCreateFailure};
use crate::workflow::WorkflowNotifier;

use super::reconciler::DeployReconciler;

/// External services the orchestrator talks to.
pub struct Collaborators {
    /// Source of templates and configuration files.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Template configuration parser.
    pub config_parser: Arc<dyn ConfigParser>,
    /// Stack control plane.
    pub control_plane: Arc<dyn ControlPlane>,
    /// Workflow resumption.
    pub workflow: WorkflowNotifier,
    /// Commit status reporting.
    pub commit_status: CommitStatusReporter,
}

/// Turns a deployment request into one reconciled stack operation, one
/// workflow notification and one terminal commit status.
pub struct DeploymentOrchestrator {
    artifacts: Arc<dyn ArtifactStore>,
    config_parser: Arc<dyn ConfigParser>,
    tokens: TokenGenerator,
    reconciler: DeployReconciler,
    workflow: WorkflowNotifier,
    commit_status: CommitStatusReporter,
    notification_target: Option<String>,
    on_create_failure: OnCreateFailure,
    timeout: Duration,
}

impl DeploymentOrchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(collaborators: Collaborators, config: &DeploymentConfig, retry: RetryPolicy) -> Self {
        Self {
            artifacts: collaborators.artifacts,
            config_parser: collaborators.config_parser,
            tokens: TokenGenerator::new(config.token_mode),
            reconciler: DeployReconciler::new(collaborators.control_plane, retry, config),
            workflow: collaborators.workflow,
            commit_status: collaborators.commit_status,
            notification_target: config.notification_target.clone(),
            on_create_failure: config.on_create_failure,
            timeout: config.timeout(),
        }
    }

    /// Handle one request.
    ///
    /// The outcome is not returned: the workflow notification is the only
    /// result channel. Every path, including errors, panics and the overall
    /// timeout, sends exactly one workflow signal followed by exactly one
    /// terminal commit status.
    pub async fn handle(&self, request: &DeploymentRequest) {
        info!(
            stack = %request.stack_name,
            environment = %request.environment_name,
            token = %request.token,
            "starting deployment"
        );

        let attempt = AssertUnwindSafe(self.deploy(request)).catch_unwind();
        let outcome = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => DeploymentOutcome::failure(e.to_string()),
            Ok(Err(panic)) => DeploymentOutcome::failure(panic_message(panic.as_ref())),
            Err(_) => DeploymentOutcome::failure(
                DeployError::Timeout(self.timeout.as_secs()).to_string(),
            ),
        };

        match &outcome {
            DeploymentOutcome::Failure { cause } => error!(
                stack = %request.stack_name,
                environment = %request.environment_name,
                cause = %cause,
                "deployment failed"
            ),
            DeploymentOutcome::Success { outputs } | DeploymentOutcome::NoChanges { outputs } => {
                info!(
                    stack = %request.stack_name,
                    environment = %request.environment_name,
                    outcome = %outcome,
                    outputs = outputs.len(),
                    "deployment finished"
                );
            }
        }

        self.workflow.notify(&request.token, &outcome).await;
        self.commit_status
            .report_outcome(status_target(request), &outcome)
            .await;
    }

    async fn deploy(&self, request: &DeploymentRequest) -> DeployResult<DeploymentOutcome> {
        let location = &request.artifact_location;

        let template = self
            .artifacts
            .get_entry(location, &request.template_file_name)
            .await?;
        let template = String::from_utf8(template.to_vec()).map_err(|_| {
            DeployError::InvalidRequest(format!(
                "template {} is not valid UTF-8",
                request.template_file_name
            ))
        })?;

        let configuration = match request.configuration_file() {
            Some(file_name) => {
                let data = self.artifacts.get_entry(location, file_name).await?;
                Some(self.config_parser.parse(&data)?)
            }
            None => None,
        };

        let merged = parameters::merge(
            configuration.as_ref().map(|c| c.parameters.as_slice()),
            Some(&request.parameter_overrides),
        );
        let (tags, stack_policy) = configuration
            .map(|c| (c.tags, c.stack_policy))
            .unwrap_or_default();

        let context = DeployStackContext {
            stack_name: request.stack_name.clone(),
            template,
            role_arn: request.role_arn.clone(),
            parameters: merged,
            tags,
            stack_policy,
            client_request_token: self.tokens.generate(request),
            capabilities: request.capabilities.clone(),
            notification_target: self.notification_target.clone(),
            on_create_failure: self.on_create_failure,
        };

        self.commit_status
            .report_pending(status_target(request))
            .await;

        match self.reconciler.reconcile(&context).await {
            Reconciled::Converged(converged) => Ok(DeploymentOutcome::Success {
                outputs: converged.into_data().outputs,
            }),
            Reconciled::NoChangesNeeded(_) => {
                let outputs = self
                    .reconciler
                    .reader()
                    .outputs(&request.stack_name, &request.role_arn)
                    .await?;
                Ok(DeploymentOutcome::NoChanges { outputs })
            }
            Reconciled::Failed(failed) => Ok(DeploymentOutcome::failure(
                failed.into_data().error.unwrap_or_default(),
            )),
        }
    }
}

fn status_target(request: &DeploymentRequest) -> StatusTarget<'_> {
    StatusTarget {
        project: &request.stack_name,
        environment: &request.environment_name,
        commit: request.commit_info.as_ref(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    format!("deployment panicked: {message}")
}
