//! Deployment orchestration.
//!
//! The [`DeployReconciler`] owns create-versus-update and convergence; the
//! [`DeploymentOrchestrator`] sequences artifact loading, parameter merging,
//! reconciliation and the outbound notifications around it.

mod orchestrator;
mod reconciler;

pub use orchestrator::{Collaborators, DeploymentOrchestrator};
pub use reconciler::DeployReconciler;
