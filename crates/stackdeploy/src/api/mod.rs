//! HTTP intake for deployment requests.
//!
//! Provides endpoints for:
//! - Accepting queue messages (`POST /deployments`)
//! - Health checks

pub mod messages;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::DeployError;
use crate::service::Dispatcher;

pub use messages::{translate, QueueMessage};

/// Shared application state for the intake API.
#[derive(Clone)]
pub struct AppState {
    /// Hands accepted requests to the worker pool.
    pub dispatcher: Dispatcher,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/deployments", post(accept_deployment))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Accept a queue message and deploy it in the background.
async fn accept_deployment(
    State(state): State<AppState>,
    Json(message): Json<QueueMessage>,
) -> (StatusCode, Json<AcceptResponse>) {
    let request = match translate(&message) {
        Ok(request) => request,
        Err(e) => {
            warn!(message_id = %message.message_id, error = %e, "rejected deployment request");
            return rejected(StatusCode::BAD_REQUEST, message.message_id, &e);
        }
    };

    let stack = request.stack_name.to_string();
    if let Err(e) = state.dispatcher.dispatch(request).await {
        warn!(message_id = %message.message_id, error = %e, "dispatcher unavailable");
        return rejected(StatusCode::SERVICE_UNAVAILABLE, message.message_id, &e);
    }

    info!(message_id = %message.message_id, stack = %stack, "deployment request accepted");
    (
        StatusCode::ACCEPTED,
        Json(AcceptResponse {
            accepted: true,
            message_id: message.message_id,
            stack: Some(stack),
            error: None,
        }),
    )
}

fn rejected(
    status: StatusCode,
    message_id: String,
    error: &DeployError,
) -> (StatusCode, Json<AcceptResponse>) {
    (
        status,
        Json(AcceptResponse {
            accepted: false,
            message_id,
            stack: None,
            error: Some(error.to_string()),
        }),
    )
}

/// Health response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Response to an intake request.
#[derive(Debug, Serialize)]
pub struct AcceptResponse {
    /// Whether the message was queued for deployment.
    pub accepted: bool,
    /// Echoed delivery id.
    pub message_id: String,
    /// Target stack, when accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Why the message was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::artifact::{archive, ObjectArtifactStore};
    use crate::config::{CommitStatusConfig, DeploymentConfig};
    use crate::deployment::{Collaborators, DeploymentOrchestrator};
    use crate::retry::RetryPolicy;
    use crate::stack::MemoryControlPlane;
    use crate::status::CommitStatusReporter;
    use crate::template_config::JsonConfigParser;
    use crate::workflow::{MemoryWorkflowClient, WorkflowNotifier};

    struct Harness {
        app: Router,
        artifacts: Arc<ObjectArtifactStore>,
        workflow: Arc<MemoryWorkflowClient>,
        dispatcher: Dispatcher,
    }

    fn harness() -> Harness {
        let artifacts = Arc::new(ObjectArtifactStore::with_store(Arc::new(
            object_store::memory::InMemory::new(),
        )));
        let workflow = Arc::new(MemoryWorkflowClient::new());
        let config = DeploymentConfig {
            poll_interval_ms: 1,
            ..DeploymentConfig::default()
        };

        let orchestrator = DeploymentOrchestrator::new(
            Collaborators {
                artifacts: artifacts.clone(),
                config_parser: Arc::new(JsonConfigParser),
                control_plane: Arc::new(MemoryControlPlane::new()),
                workflow: WorkflowNotifier::new(workflow.clone(), RetryPolicy::none()),
                commit_status: CommitStatusReporter::new(None, &CommitStatusConfig::default()),
            },
            &config,
            RetryPolicy::none(),
        );
        let dispatcher = Dispatcher::new(Arc::new(orchestrator), 2, Duration::from_secs(5));

        Harness {
            app: router(AppState {
                dispatcher: dispatcher.clone(),
            }),
            artifacts,
            workflow,
            dispatcher,
        }
    }

    fn post_deployment(message: &QueueMessage) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/deployments")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(message).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let response = harness()
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn accepted_message_is_deployed() {
        let harness = harness();
        let data = archive::pack(&[("template.yml", b"Resources: {}".as_slice())], None).unwrap();
        harness.artifacts.put("builds/1.tar", data).await.unwrap();

        let message = QueueMessage {
            message_id: "msg-1".to_owned(),
            body: serde_json::json!({
                "artifactLocation": "builds/1.tar",
                "templateFileName": "template.yml",
                "stackName": "orders-svc",
                "roleArn": "arn:aws:iam::123456789012:role/deployer",
                "token": "task-token-1",
            })
            .to_string(),
        };

        let response = harness.app.oneshot(post_deployment(&message)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["stack"], "orders-svc");

        tokio::time::timeout(Duration::from_secs(5), harness.dispatcher.drain())
            .await
            .unwrap();
        assert_eq!(harness.workflow.signals().len(), 1);
    }

    #[tokio::test]
    async fn malformed_message_is_rejected() {
        let harness = harness();
        let message = QueueMessage {
            message_id: "msg-2".to_owned(),
            body: "{}".to_owned(),
        };

        let response = harness.app.oneshot(post_deployment(&message)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["accepted"], false);
        assert!(harness.workflow.signals().is_empty());
    }
}
