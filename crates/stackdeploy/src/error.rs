//! Error types for stackdeploy.

/// Result type alias using [`DeployError`].
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors that can occur while handling a deployment request.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Template or configuration entry missing from the packaged artifact.
    #[error("artifact entry not found: {0}")]
    ArtifactNotFound(String),

    /// Object storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Template configuration file could not be parsed.
    #[error("failed to parse template configuration: {0}")]
    ConfigParse(String),

    /// Control plane error.
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    /// Workflow engine error.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Commit status API error.
    #[error("commit status error: {0}")]
    CommitStatus(String),

    /// Inbound message could not be translated into a request.
    #[error("invalid deployment request: {0}")]
    InvalidRequest(String),

    /// The overall deployment attempt exceeded its ceiling.
    #[error("deployment timed out after {0}s")]
    Timeout(u64),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Create a storage error.
    #[must_use]
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Errors reported by the stack control plane.
///
/// Variants are split into permanent failures, which surface immediately,
/// and transient ones, which the reconciler retries with backoff.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlPlaneError {
    /// The named stack does not exist.
    #[error("stack not found: {0}")]
    StackNotFound(String),

    /// The assumed role lacks permission for the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The template, parameters or request were rejected.
    #[error("validation error: {0}")]
    Validation(String),

    /// Request rate exceeded.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Another operation is in progress against the same stack.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Network failure or a 5xx from the control plane.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),

    /// Convergence did not finish within the configured ceiling.
    #[error("timed out waiting for stack {stack} to converge after {secs}s")]
    Timeout {
        /// Stack name.
        stack: String,
        /// Ceiling that was exceeded, in seconds.
        secs: u64,
    },
}

impl ControlPlaneError {
    /// Whether the error is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled(_) | Self::ConcurrentModification(_) | Self::Unavailable(_)
        )
    }

    /// Whether the error is worth retrying once a mutation was accepted.
    ///
    /// Reads right after a create or update can miss the stack while the
    /// control plane catches up, so `StackNotFound` is retried too.
    #[must_use]
    pub const fn is_transient_after_submit(&self) -> bool {
        self.is_transient() || matches!(self, Self::StackNotFound(_))
    }
}

/// Errors reported by the durable workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// The task token was already used to resume the workflow.
    #[error("task token already consumed")]
    TaskTokenConsumed,

    /// The waiting task timed out before it was resumed.
    #[error("task timed out")]
    TaskTimedOut,

    /// The token is not recognised by the workflow engine.
    #[error("invalid task token: {0}")]
    InvalidToken(String),

    /// Network failure or a 5xx from the workflow engine.
    #[error("workflow engine unavailable: {0}")]
    Unavailable(String),
}

impl WorkflowError {
    /// Rejections mean the token can never be used again; retrying is pointless.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }
}
