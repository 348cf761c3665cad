//! Commit status reporting.
//!
//! Mirrors the deployment phase onto the commit that triggered it. Reporting
//! is best-effort: errors are logged and never change the deployment outcome.

mod github;
mod memory;

pub use github::GithubStatusClient;
pub use memory::{MemoryStatusClient, ReportedStatus};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CommitStatusConfig;
use crate::error::DeployResult;
use crate::redact::{describe_failure, truncate, DESCRIPTION_LIMIT};
use crate::types::{CommitInfo, DeploymentOutcome, StackName};

/// Commit status state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    /// Deployment in progress.
    Pending,
    /// Deployment succeeded or needed no changes.
    Success,
    /// Deployment failed.
    Failure,
}

/// A fully rendered status, ready to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatus {
    /// State.
    pub state: CommitState,
    /// Link to the deployed stack.
    pub target_url: String,
    /// Short human-readable text.
    pub description: String,
    /// Label distinguishing this status from other checks.
    pub context: String,
}

/// Client for a source-control commit status API.
#[async_trait]
pub trait CommitStatusClient: Send + Sync {
    /// Post a status for `commit`.
    async fn report(&self, commit: &CommitInfo, status: &CommitStatus) -> DeployResult<()>;
}

/// What a report is about.
#[derive(Debug, Clone, Copy)]
pub struct StatusTarget<'a> {
    /// Project, named after the stack.
    pub project: &'a StackName,
    /// Deployment environment.
    pub environment: &'a str,
    /// Commit to attach the status to.
    pub commit: Option<&'a CommitInfo>,
}

/// Best-effort commit status reporter.
#[derive(Clone)]
pub struct CommitStatusReporter {
    client: Option<Arc<dyn CommitStatusClient>>,
    service_name: String,
    details_url_template: String,
}

impl CommitStatusReporter {
    /// Create a reporter. A `None` client disables reporting.
    #[must_use]
    pub fn new(client: Option<Arc<dyn CommitStatusClient>>, config: &CommitStatusConfig) -> Self {
        Self {
            client: client.filter(|_| config.enabled),
            service_name: config.service_name.clone(),
            details_url_template: config.details_url_template.clone(),
        }
    }

    /// A reporter that reports nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, &CommitStatusConfig::default())
    }

    /// Report that the deployment has started.
    pub async fn report_pending(&self, target: StatusTarget<'_>) {
        let description = format!("Deploying {}", target.project);
        self.report(target, CommitState::Pending, description).await;
    }

    /// Report the terminal state for `outcome`.
    pub async fn report_outcome(&self, target: StatusTarget<'_>, outcome: &DeploymentOutcome) {
        let (state, description) = match outcome {
            DeploymentOutcome::Success { .. } => (
                CommitState::Success,
                format!("Deployed {}", target.project),
            ),
            DeploymentOutcome::NoChanges { .. } => (
                CommitState::Success,
                format!("No changes to deploy for {}", target.project),
            ),
            DeploymentOutcome::Failure { cause } => {
                (CommitState::Failure, describe_failure(cause))
            }
        };
        self.report(target, state, description).await;
    }

    /// Post one status, logging and swallowing any error.
    pub async fn report(&self, target: StatusTarget<'_>, state: CommitState, description: String) {
        let Some(client) = &self.client else {
            return;
        };
        let Some(commit) = target.commit else {
            debug!(project = %target.project, ?state, "no commit information, skipping status");
            return;
        };

        let status = CommitStatus {
            state,
            target_url: self.details_url(target.project),
            description: truncate(&description, DESCRIPTION_LIMIT),
            context: format!("{} ({})", self.service_name, target.environment),
        };

        match client.report(commit, &status).await {
            Ok(()) => debug!(
                project = %target.project,
                git_ref = %commit.git_ref,
                ?state,
                "commit status reported"
            ),
            Err(e) => warn!(
                project = %target.project,
                git_ref = %commit.git_ref,
                ?state,
                error = %e,
                "failed to report commit status"
            ),
        }
    }

    fn details_url(&self, project: &StackName) -> String {
        self.details_url_template.replace("{stack}", project.as_str())
    }
}

impl fmt::Debug for CommitStatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitStatusReporter")
            .field("enabled", &self.client.is_some())
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}
