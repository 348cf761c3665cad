//! Inbound queue messages.

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};
use crate::types::DeploymentRequest;

/// A message as delivered by the queueing transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Transport-assigned delivery id. Redeliveries may reuse or change it.
    pub message_id: String,
    /// JSON-encoded deployment request.
    pub body: String,
}

/// Translate a queue message into a deployment request.
///
/// A message that fails here carries no usable task token, so no workflow
/// can be resumed for it; the error is returned for the transport to
/// dead-letter.
pub fn translate(message: &QueueMessage) -> DeployResult<DeploymentRequest> {
    let mut request: DeploymentRequest = serde_json::from_str(&message.body)
        .map_err(|e| DeployError::InvalidRequest(format!("{}: {e}", message.message_id)))?;

    let required = [
        ("token", request.token.as_str()),
        ("stackName", request.stack_name.as_str()),
        ("templateFileName", request.template_file_name.as_str()),
        ("artifactLocation", request.artifact_location.as_str()),
        ("roleArn", request.role_arn.as_str()),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(DeployError::InvalidRequest(format!(
            "{}: {field} must not be empty",
            message.message_id
        )));
    }

    request.delivery_id = Some(message.message_id.clone());
    Ok(request)
}
