//! Idempotency tokens for control-plane mutations.
//!
//! The token is a SHA-256 over the fields that identify one logical
//! deployment. Submitting a create or update with a token the control plane
//! has already seen for the stack does not mutate the stack again.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::types::DeploymentRequest;

/// Prefix keeps tokens starting with a letter, as control planes require.
const TOKEN_PREFIX: &str = "stackdeploy-";

/// How queue redeliveries of the same request are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenMode {
    /// Derive the token from request content only.
    ///
    /// A redelivered message produces the same token, so the control plane
    /// absorbs it without a second mutation.
    #[default]
    Content,

    /// Mix the queue delivery id into the token.
    ///
    /// Every delivery is an independent attempt and may mutate the stack.
    /// A request without a delivery id gets the content token, with a
    /// warning.
    PerDelivery,
}

impl TokenMode {
    /// Get the mode name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::PerDelivery => "per_delivery",
        }
    }
}

/// Generates idempotency tokens for deployment requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenGenerator {
    mode: TokenMode,
}

impl TokenGenerator {
    /// Create a generator using the given mode.
    #[must_use]
    pub const fn new(mode: TokenMode) -> Self {
        Self { mode }
    }

    /// The configured mode.
    #[must_use]
    pub const fn mode(&self) -> TokenMode {
        self.mode
    }

    /// Compute the token for a request.
    #[must_use]
    pub fn generate(&self, request: &DeploymentRequest) -> String {
        const DELIMITER: &[u8] = b"\x00";

        let mut hasher = Sha256::new();
        let mut field = |value: &str| {
            hasher.update(value.as_bytes());
            hasher.update(DELIMITER);
        };

        field(&request.artifact_location);
        field(&request.template_file_name);
        field(request.configuration_file().unwrap_or_default());
        field(request.stack_name.as_str());
        field(&request.role_arn);
        field(request.token.as_str());
        field(&request.environment_name);

        for (key, value) in &request.parameter_overrides {
            field(key);
            field(value);
        }
        field("");

        for capability in &request.capabilities {
            field(capability);
        }
        field("");

        if let Some(commit) = &request.commit_info {
            field(&commit.owner);
            field(&commit.repository);
            field(&commit.git_ref);
        }
        field("");

        if self.mode == TokenMode::PerDelivery {
            match &request.delivery_id {
                Some(delivery_id) => field(delivery_id),
                None => warn!(
                    stack = %request.stack_name,
                    "per-delivery token requested without a delivery id, using content token"
                ),
            }
        }

        format!("{TOKEN_PREFIX}{}", hex::encode(hasher.finalize()))
    }
}
