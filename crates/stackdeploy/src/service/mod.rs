//! Service lifecycle management.
//!
//! Wires the HTTP collaborators from configuration, runs the intake API on a
//! bounded worker pool and drains in-flight deployments on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api;
use crate::artifact::ObjectArtifactStore;
use crate::config::DeployConfig;
use crate::deployment::{Collaborators, DeploymentOrchestrator};
use crate::error::{DeployError, DeployResult};
use crate::retry::RetryPolicy;
use crate::stack::HttpControlPlane;
use crate::status::{CommitStatusClient, CommitStatusReporter, GithubStatusClient};
use crate::template_config::JsonConfigParser;
use crate::types::DeploymentRequest;
use crate::workflow::{HttpWorkflowClient, WorkflowNotifier};

/// Upper bound on the worker pool size.
const MAX_CONCURRENT: usize = 4096;

/// Runs deployments on a bounded pool of tokio tasks.
#[derive(Clone)]
pub struct Dispatcher {
    orchestrator: Arc<DeploymentOrchestrator>,
    permits: Arc<Semaphore>,
    capacity: u32,
    admission_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher running at most `max_concurrent` deployments.
    ///
    /// A request waits up to `admission_timeout` for a free slot.
    #[must_use]
    pub fn new(
        orchestrator: Arc<DeploymentOrchestrator>,
        max_concurrent: usize,
        admission_timeout: Duration,
    ) -> Self {
        let slots = max_concurrent.clamp(1, MAX_CONCURRENT);
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(slots)),
            capacity: u32::try_from(slots).unwrap_or(1),
            admission_timeout,
        }
    }

    /// Start handling `request` in the background.
    ///
    /// Fails if no slot frees up in time or the dispatcher has been drained.
    pub async fn dispatch(&self, request: DeploymentRequest) -> DeployResult<()> {
        let permit = tokio::time::timeout(
            self.admission_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        .map_err(|_| DeployError::internal("all deployment workers are busy"))?
        .map_err(|_| DeployError::internal("dispatcher is shut down"))?;

        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            orchestrator.handle(&request).await;
            drop(permit);
        });
        Ok(())
    }

    /// Wait for in-flight deployments and refuse new ones.
    pub async fn drain(&self) {
        if let Ok(all) = self.permits.acquire_many(self.capacity).await {
            drop(all);
        }
        self.permits.close();
    }

    /// Deployments currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        usize::try_from(self.capacity)
            .unwrap_or(0)
            .saturating_sub(self.permits.available_permits())
    }
}

/// Build an orchestrator wired to the HTTP collaborators in `config`.
pub fn build_orchestrator(config: &DeployConfig) -> DeployResult<DeploymentOrchestrator> {
    let retry = RetryPolicy::from(&config.retry);

    let artifacts = Arc::new(ObjectArtifactStore::new(&config.artifacts)?);
    info!(storage_type = %config.artifacts.storage_type, "artifact store configured");

    let control_plane = Arc::new(HttpControlPlane::new(&config.control_plane)?);
    info!(url = %config.control_plane.url, "control plane client configured");

    let workflow_client = Arc::new(HttpWorkflowClient::new(&config.workflow)?);
    let workflow = WorkflowNotifier::new(
        workflow_client,
        RetryPolicy {
            max_attempts: config.workflow.max_attempts.max(1),
            ..retry
        },
    );
    info!(url = %config.workflow.url, "workflow client configured");

    let status_client: Option<Arc<dyn CommitStatusClient>> = if config.commit_status.enabled {
        Some(Arc::new(GithubStatusClient::new(&config.commit_status)?))
    } else {
        None
    };
    let commit_status = CommitStatusReporter::new(status_client, &config.commit_status);
    info!(enabled = config.commit_status.enabled, "commit status reporting configured");

    Ok(DeploymentOrchestrator::new(
        Collaborators {
            artifacts,
            config_parser: Arc::new(JsonConfigParser),
            control_plane,
            workflow,
            commit_status,
        },
        &config.deployment,
        retry,
    ))
}

/// The deployment service.
pub struct DeployService {
    config: DeployConfig,
    cancel: CancellationToken,
}

impl DeployService {
    /// Create a new service with the given configuration.
    #[must_use]
    pub fn new(config: DeployConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run until a shutdown signal, then drain in-flight deployments.
    pub async fn run(&self) -> DeployResult<()> {
        let orchestrator = Arc::new(build_orchestrator(&self.config)?);
        let dispatcher = Dispatcher::new(
            orchestrator,
            self.config.deployment.max_concurrent,
            Duration::from_secs(self.config.server.request_timeout_secs),
        );

        let app = api::router(api::AppState {
            dispatcher: dispatcher.clone(),
        });

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| DeployError::Config(format!("failed to bind TCP: {e}")))?;
        info!(
            listen_addr = %self.config.server.listen_addr,
            max_concurrent = self.config.deployment.max_concurrent,
            "deployment service listening"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| DeployError::Config(format!("server error: {e}")))?;

        info!(in_flight = dispatcher.in_flight(), "draining deployments");
        dispatcher.drain().await;

        info!("deployment service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtifactConfig;

    fn memory_config() -> DeployConfig {
        DeployConfig {
            artifacts: ArtifactConfig {
                storage_type: "memory".to_owned(),
                ..ArtifactConfig::default()
            },
            ..DeployConfig::default()
        }
    }

    #[test]
    fn service_shutdown() {
        let service = DeployService::new(DeployConfig::default());
        assert!(!service.cancel.is_cancelled());
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }

    #[test]
    fn orchestrator_from_config() {
        assert!(build_orchestrator(&memory_config()).is_ok());
    }

    #[test]
    fn bad_storage_type_fails_wiring() {
        let mut config = memory_config();
        config.artifacts.storage_type = "tape".to_owned();
        assert!(matches!(
            build_orchestrator(&config),
            Err(DeployError::Config(_))
        ));
    }

    #[tokio::test]
    async fn drained_dispatcher_refuses_work() {
        let orchestrator = Arc::new(build_orchestrator(&memory_config()).unwrap());
        let dispatcher = Dispatcher::new(orchestrator, 0, Duration::from_millis(10));
        assert_eq!(dispatcher.capacity, 1);
        assert_eq!(dispatcher.in_flight(), 0);

        dispatcher.drain().await;

        let request: DeploymentRequest = serde_json::from_value(serde_json::json!({
            "artifactLocation": "builds/1.tar",
            "templateFileName": "template.yml",
            "stackName": "orders-svc",
            "roleArn": "role",
            "token": "task-token",
        }))
        .unwrap();
        let err = dispatcher.dispatch(request).await.unwrap_err();
        assert_eq!(err.to_string(), "internal error: dispatcher is shut down");
    }
}
