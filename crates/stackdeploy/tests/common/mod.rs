//! Common test utilities for orchestrator integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use stackdeploy::artifact::{archive, ObjectArtifactStore};
use stackdeploy::config::{CommitStatusConfig, DeploymentConfig};
use stackdeploy::stack::MemoryControlPlane;
use stackdeploy::status::{CommitState, CommitStatusClient, CommitStatusReporter, MemoryStatusClient};
use stackdeploy::template_config::{ConfigParser, JsonConfigParser};
use stackdeploy::workflow::{MemoryWorkflowClient, WorkflowNotifier};
use stackdeploy::{
    Collaborators, CommitInfo, DeploymentOrchestrator, DeploymentRequest, RetryPolicy, StackName,
    TaskToken,
};

pub const ARTIFACT: &str = "s3://artifacts/orders/build-42.tar.zst";
pub const TEMPLATE_FILE: &str = "template.yml";
pub const TEMPLATE: &str = "Resources:\n  Queue:\n    Type: AWS::SQS::Queue\n";

/// Orchestrator wired to in-memory collaborators.
pub struct TestDeployer {
    pub artifacts: Arc<ObjectArtifactStore>,
    pub control_plane: Arc<MemoryControlPlane>,
    pub workflow: Arc<MemoryWorkflowClient>,
    pub statuses: Arc<MemoryStatusClient>,
    pub orchestrator: DeploymentOrchestrator,
}

impl TestDeployer {
    /// Creates a deployer with fast polling and retries.
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Creates a deployer with custom deployment configuration.
    pub fn with_config(config: DeploymentConfig) -> Self {
        Self::build(config, Arc::new(JsonConfigParser))
    }

    /// Creates a deployer with a custom configuration parser.
    pub fn with_parser(parser: Arc<dyn ConfigParser>) -> Self {
        Self::build(fast_config(), parser)
    }

    fn build(config: DeploymentConfig, config_parser: Arc<dyn ConfigParser>) -> Self {
        let artifacts = Arc::new(ObjectArtifactStore::with_store(Arc::new(
            object_store::memory::InMemory::new(),
        )));
        let control_plane = Arc::new(MemoryControlPlane::new());
        let workflow = Arc::new(MemoryWorkflowClient::new());
        let statuses = Arc::new(MemoryStatusClient::new());

        let status_client: Arc<dyn CommitStatusClient> = statuses.clone();
        let orchestrator = DeploymentOrchestrator::new(
            Collaborators {
                artifacts: artifacts.clone(),
                config_parser,
                control_plane: control_plane.clone(),
                workflow: WorkflowNotifier::new(workflow.clone(), fast_retry()),
                commit_status: CommitStatusReporter::new(
                    Some(status_client),
                    &CommitStatusConfig::default(),
                ),
            },
            &config,
            fast_retry(),
        );

        Self {
            artifacts,
            control_plane,
            workflow,
            statuses,
            orchestrator,
        }
    }

    /// Uploads an artifact holding the standard template plus `extra` entries.
    pub async fn upload(&self, extra: &[(&str, &[u8])]) {
        let mut entries = vec![(TEMPLATE_FILE, TEMPLATE.as_bytes())];
        entries.extend_from_slice(extra);
        let data = archive::pack(&entries, Some(3)).unwrap();
        self.artifacts.put(ARTIFACT, data).await.unwrap();
    }

    /// Commit states reported so far, in order.
    pub fn status_states(&self) -> Vec<CommitState> {
        self.statuses
            .reported()
            .into_iter()
            .map(|r| r.status.state)
            .collect()
    }
}

/// Deployment config with millisecond polling.
pub fn fast_config() -> DeploymentConfig {
    DeploymentConfig {
        poll_interval_ms: 1,
        convergence_timeout_secs: 10,
        timeout_secs: 30,
        ..DeploymentConfig::default()
    }
}

/// Three attempts with millisecond backoff.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

/// A request for `stack` with `{Env: prod}` overrides and commit metadata.
pub fn request(stack: &str, token: &str) -> DeploymentRequest {
    DeploymentRequest {
        artifact_location: ARTIFACT.to_owned(),
        template_file_name: TEMPLATE_FILE.to_owned(),
        template_configuration_file_name: None,
        stack_name: StackName::new(stack),
        role_arn: "arn:aws:iam::123456789012:role/deployer".to_owned(),
        parameter_overrides: BTreeMap::from([("Env".to_owned(), "prod".to_owned())]),
        capabilities: vec!["CAPABILITY_IAM".to_owned()],
        token: TaskToken::new(token),
        environment_name: "prod".to_owned(),
        commit_info: Some(CommitInfo {
            owner: "acme".to_owned(),
            repository: "orders".to_owned(),
            git_ref: "0f3c2a1".to_owned(),
        }),
        delivery_id: Some("delivery-1".to_owned()),
    }
}
