//! Core types for stackdeploy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stack outputs keyed by output name.
pub type StackOutputs = BTreeMap<String, String>;

/// Name of a stack managed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackName(String);

impl StackName {
    /// Create a new stack name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StackName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Token the waiting workflow task is resumed with.
///
/// `Display` shows only a short prefix so tokens can be logged safely.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskToken(String);

impl TaskToken {
    /// Create a new task token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the full token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "{prefix}…")
    }
}

impl fmt::Debug for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskToken({self})")
    }
}

/// Source-control commit the deployment was triggered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    /// Repository owner.
    #[serde(alias = "githubOwner")]
    pub owner: String,
    /// Repository name.
    #[serde(alias = "githubRepository")]
    pub repository: String,
    /// Commit SHA or ref.
    #[serde(alias = "githubRef")]
    pub git_ref: String,
}

/// A deployment request received once per logical deployment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    /// Object-store location of the packaged artifact.
    #[serde(alias = "zipLocation")]
    pub artifact_location: String,
    /// Template entry inside the artifact.
    pub template_file_name: String,
    /// Optional template-configuration entry inside the artifact.
    #[serde(default)]
    pub template_configuration_file_name: Option<String>,
    /// Target stack.
    pub stack_name: StackName,
    /// Role the control plane assumes to deploy the stack.
    pub role_arn: String,
    /// Parameter values overriding the configuration file.
    #[serde(default)]
    pub parameter_overrides: BTreeMap<String, String>,
    /// Capabilities the template is allowed to use.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Workflow task token to resume when the deployment finishes.
    pub token: TaskToken,
    /// Environment name (e.g. "prod").
    #[serde(default)]
    pub environment_name: String,
    /// Commit that triggered the deployment.
    #[serde(default)]
    pub commit_info: Option<CommitInfo>,
    /// Queue delivery the request arrived in. Not part of the wire body.
    #[serde(skip)]
    pub delivery_id: Option<String>,
}

impl DeploymentRequest {
    /// Configuration file name, treating blank names as absent.
    #[must_use]
    pub fn configuration_file(&self) -> Option<&str> {
        self.template_configuration_file_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

/// A single stack parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter key.
    pub key: String,
    /// Parameter value.
    pub value: String,
}

impl Parameter {
    /// Create a new parameter.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A stack tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Create a new tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Parsed template configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateConfiguration {
    /// Parameters in file order.
    pub parameters: Vec<Parameter>,
    /// Stack tags.
    pub tags: Vec<Tag>,
    /// Stack policy document body.
    pub stack_policy: Option<String>,
}

/// What the control plane does with a stack whose creation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnCreateFailure {
    /// Delete the partially created stack.
    #[default]
    Delete,
    /// Roll the stack back, keeping it in a failed state.
    Rollback,
    /// Leave the resources as they are.
    DoNothing,
}

/// Command submitted to the control plane for one attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStackContext {
    /// Target stack.
    pub stack_name: StackName,
    /// Template body.
    pub template: String,
    /// Role the control plane assumes.
    pub role_arn: String,
    /// Merged parameters.
    pub parameters: Vec<Parameter>,
    /// Stack tags.
    pub tags: Vec<Tag>,
    /// Stack policy document body.
    pub stack_policy: Option<String>,
    /// Idempotency token for the mutation.
    pub client_request_token: String,
    /// Allowed capabilities.
    pub capabilities: Vec<String>,
    /// Where the control plane publishes stack events, if anywhere.
    pub notification_target: Option<String>,
    /// Policy applied when a create fails.
    pub on_create_failure: OnCreateFailure,
}

/// Terminal outcome of one deployment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// The stack converged.
    Success {
        /// Stack outputs after convergence.
        outputs: StackOutputs,
    },
    /// The stack already matched the submitted template and parameters.
    NoChanges {
        /// Current stack outputs.
        outputs: StackOutputs,
    },
    /// The deployment failed.
    Failure {
        /// Raw failure message.
        cause: String,
    },
}

impl DeploymentOutcome {
    /// Create a failure outcome.
    #[must_use]
    pub fn failure(cause: impl Into<String>) -> Self {
        Self::Failure {
            cause: cause.into(),
        }
    }

    /// Whether the workflow should be resumed with success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::NoChanges { .. })
    }

    /// Outcome name for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::NoChanges { .. } => "no_changes",
            Self::Failure { .. } => "failure",
        }
    }
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_from_json() {
        let body = serde_json::json!({
            "zipLocation": "s3://artifacts/build-42.tar",
            "templateFileName": "template.yml",
            "templateConfigurationFileName": "",
            "stackName": "orders-svc",
            "roleArn": "arn:aws:iam::123456789012:role/deployer",
            "parameterOverrides": { "Env": "prod" },
            "capabilities": ["CAPABILITY_IAM"],
            "token": "task-token-abc",
            "environmentName": "prod",
            "commitInfo": {
                "githubOwner": "acme",
                "githubRepository": "orders",
                "githubRef": "abc123"
            }
        });

        let request: DeploymentRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.artifact_location, "s3://artifacts/build-42.tar");
        assert_eq!(request.stack_name.as_str(), "orders-svc");
        assert_eq!(request.parameter_overrides["Env"], "prod");
        assert_eq!(request.configuration_file(), None);
        assert_eq!(request.commit_info.unwrap().git_ref, "abc123");
        assert!(request.delivery_id.is_none());
    }

    #[test]
    fn task_token_display_is_truncated() {
        let token = TaskToken::new("AAAAKgAAAAIAAAAAAAAAAQ-very-long-secret");
        assert_eq!(token.to_string(), "AAAAKgAA…");
        assert!(!format!("{token:?}").contains("secret"));
    }

    #[test]
    fn outcome_success_classification() {
        assert!(DeploymentOutcome::Success {
            outputs: StackOutputs::new()
        }
        .is_success());
        assert!(DeploymentOutcome::NoChanges {
            outputs: StackOutputs::new()
        }
        .is_success());
        assert!(!DeploymentOutcome::failure("boom").is_success());
    }
}
