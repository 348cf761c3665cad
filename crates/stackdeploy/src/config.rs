//! Configuration for stackdeploy.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{DeployError, DeployResult};
use crate::token::TokenMode;
use crate::types::OnCreateFailure;

/// Top-level configuration for the deployment service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeployConfig {
    /// HTTP intake configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Deployment behaviour.
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Retry policy for control-plane calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Artifact storage.
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Stack control plane.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Durable workflow engine.
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Commit status reporting.
    #[serde(default)]
    pub commit_status: CommitStatusConfig,
}

impl DeployConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `stackdeploy.toml` in the current directory (if present)
    /// 3. Environment variables with `STACKDEPLOY_` prefix
    pub fn load() -> DeployResult<Self> {
        Self::from_file("stackdeploy.toml")
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> DeployResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STACKDEPLOY_").split("__"))
            .extract()
            .map_err(|e| DeployError::Config(e.to_string()))
    }
}

/// HTTP intake configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

const fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8084)
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Deployment behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Hard ceiling for one deployment attempt, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Ceiling for waiting on stack convergence, in seconds.
    #[serde(default = "default_convergence_timeout_secs")]
    pub convergence_timeout_secs: u64,

    /// Interval between operation status polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum concurrent deployments.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Where the control plane publishes stack events.
    #[serde(default)]
    pub notification_target: Option<String>,

    /// How redelivered requests map onto idempotency tokens.
    #[serde(default)]
    pub token_mode: TokenMode,

    /// What happens to a stack whose creation fails.
    #[serde(default)]
    pub on_create_failure: OnCreateFailure,
}

const fn default_timeout_secs() -> u64 {
    1800
}

const fn default_convergence_timeout_secs() -> u64 {
    1500
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_max_concurrent() -> usize {
    10
}

impl DeploymentConfig {
    /// Overall attempt ceiling.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Convergence wait ceiling.
    #[must_use]
    pub const fn convergence_timeout(&self) -> Duration {
        Duration::from_secs(self.convergence_timeout_secs)
    }

    /// Status poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            convergence_timeout_secs: default_convergence_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent: default_max_concurrent(),
            notification_target: None,
            token_mode: TokenMode::default(),
            on_create_failure: OnCreateFailure::default(),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Artifact storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    /// Storage type: "local", "memory", or "s3".
    #[serde(default = "default_storage_type")]
    pub storage_type: String,

    /// Base directory (local) or bucket name (s3).
    #[serde(default = "default_artifact_path")]
    pub path: String,

    /// S3 region.
    pub region: Option<String>,

    /// S3 endpoint URL (for S3-compatible stores).
    pub endpoint: Option<String>,
}

fn default_storage_type() -> String {
    "local".to_owned()
}

fn default_artifact_path() -> String {
    "/var/lib/stackdeploy/artifacts".to_owned()
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            storage_type: default_storage_type(),
            path: default_artifact_path(),
            region: None,
            endpoint: None,
        }
    }
}

/// Stack control plane client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL of the control plane API.
    #[serde(default = "default_control_plane_url")]
    pub url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_control_plane_url() -> String {
    "http://localhost:8085".to_owned()
}

const fn default_client_timeout_secs() -> u64 {
    10
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: default_control_plane_url(),
            timeout_secs: default_client_timeout_secs(),
        }
    }
}

/// Durable workflow engine client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Base URL of the workflow engine API.
    #[serde(default = "default_workflow_url")]
    pub url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts for delivering one notification.
    #[serde(default = "default_workflow_attempts")]
    pub max_attempts: u32,
}

fn default_workflow_url() -> String {
    "http://localhost:8086".to_owned()
}

const fn default_workflow_attempts() -> u32 {
    3
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            url: default_workflow_url(),
            timeout_secs: default_client_timeout_secs(),
            max_attempts: default_workflow_attempts(),
        }
    }
}

/// Commit status reporting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitStatusConfig {
    /// Whether statuses are reported at all.
    #[serde(default = "default_commit_status_enabled")]
    pub enabled: bool,

    /// GitHub API base URL.
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// API token.
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Service name shown in the status context.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Details link; `{stack}` is replaced by the stack name.
    #[serde(default = "default_details_url_template")]
    pub details_url_template: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_commit_status_enabled() -> bool {
    true
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_owned()
}

fn default_service_name() -> String {
    "AWS CloudFormation".to_owned()
}

fn default_details_url_template() -> String {
    "https://console.aws.amazon.com/cloudformation/home?region=us-east-1#/stacks/stackinfo?filteringText=&filteringStatus=active&viewNested=true&hideStacks=false&stackId={stack}".to_owned()
}

impl Default for CommitStatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_commit_status_enabled(),
            api_url: default_github_api_url(),
            token: None,
            service_name: default_service_name(),
            details_url_template: default_details_url_template(),
            timeout_secs: default_client_timeout_secs(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DeployConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8084);
        assert_eq!(config.deployment.timeout_secs, 1800);
        assert!(config.deployment.convergence_timeout_secs < config.deployment.timeout_secs);
        assert_eq!(config.deployment.token_mode, TokenMode::Content);
        assert_eq!(config.deployment.on_create_failure, OnCreateFailure::Delete);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.commit_status.service_name, "AWS CloudFormation");
        assert!(config.deployment.notification_target.is_none());
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [deployment]
            timeout_secs = 600
            notification_target = "arn:aws:sns:us-east-1:123456789012:stack-events"
            token_mode = "per_delivery"
            on_create_failure = "rollback"

            [retry]
            max_attempts = 2

            [commit_status]
            token = "ghp_example"
        "#;

        let config: DeployConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.deployment.timeout(), Duration::from_secs(600));
        assert_eq!(
            config.deployment.notification_target.as_deref(),
            Some("arn:aws:sns:us-east-1:123456789012:stack-events")
        );
        assert_eq!(config.deployment.token_mode, TokenMode::PerDelivery);
        assert_eq!(config.deployment.on_create_failure, OnCreateFailure::Rollback);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_backoff_ms, 200);
        assert_eq!(
            config.commit_status.token.as_ref().unwrap().expose_secret(),
            "ghp_example"
        );
    }
}
