//! Stack deployment orchestrator.
//!
//! This crate turns deployment requests from CI into idempotent
//! create-or-update operations against a stack control plane, then reports
//! the result to the durable workflow waiting on it and to the commit that
//! triggered it.
//!
//! # Architecture
//!
//! - **Parameter merging**: configuration-file parameters combined with
//!   request overrides, overrides winning
//! - **Idempotency tokens**: derived from request content so a redelivered
//!   request collapses onto the control-plane operation it already started
//! - **Reconciliation**: create if absent, update otherwise, wait for
//!   convergence; "no changes" is a success, not an error
//! - **Notification**: exactly one workflow signal per request, plus
//!   best-effort commit statuses
//!
//! # State Machine
//!
//! Reconciliation follows a typestate machine:
//!
//! ```text
//! Idle ──▶ Created|Updated ──▶ Converging ──▶ Converged
//!   │                               │
//!   ├──▶ NoChangesNeeded            ▼
//!   └───────────────────────────▶ Failed
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stackdeploy::{Collaborators, DeploymentOrchestrator, DeployConfig, RetryPolicy};
//!
//! let config = DeployConfig::load()?;
//! let orchestrator = DeploymentOrchestrator::new(collaborators, &config.deployment, RetryPolicy::from(&config.retry));
//! orchestrator.handle(&request).await;
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod artifact;
pub mod config;
pub mod deployment;
pub mod error;
pub mod parameters;
pub mod redact;
pub mod retry;
pub mod service;
pub mod stack;
pub mod state;
pub mod status;
pub mod template_config;
pub mod token;
pub mod types;
pub mod workflow;

// Re-export commonly used types at the crate root
pub use config::DeployConfig;
pub use deployment::{Collaborators, DeployReconciler, DeploymentOrchestrator};
pub use error::{ControlPlaneError, DeployError, DeployResult, WorkflowError};
pub use retry::RetryPolicy;
pub use service::{DeployService, Dispatcher};
pub use state::{Reconciled, Reconciliation};
pub use token::{TokenGenerator, TokenMode};
pub use types::{
    CommitInfo, DeployStackContext, DeploymentOutcome, DeploymentRequest, Parameter, StackName,
    StackOutputs, Tag, TaskToken, TemplateConfiguration,
};
