//! Typestate machine for stack reconciliation.
//!
//! ```text
//! Idle ──▶ Created ──┐
//!   │                ├──▶ Converging ──▶ Converged
//!   ├───▶ Updated ───┘         │
//!   │                          ▼
//!   ├──────────────────────▶ Failed
//!   ▼
//! NoChangesNeeded
//! ```
//!
//! Transitions are methods on the state they leave, so an invalid
//! transition does not compile.

use std::marker::PhantomData;
use std::time::Instant;

use crate::stack::OperationHandle;
use crate::types::{StackName, StackOutputs};

/// Marker trait for reconciliation states.
pub trait ReconcileState: private::Sealed + Send + Sync {
    /// State name for logs.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Nothing submitted yet.
#[derive(Debug, Clone, Copy)]
pub struct Idle;

/// A create was accepted by the control plane.
#[derive(Debug, Clone, Copy)]
pub struct Created;

/// An update was accepted by the control plane.
#[derive(Debug, Clone, Copy)]
pub struct Updated;

/// Waiting for the submitted operation to finish.
#[derive(Debug, Clone, Copy)]
pub struct Converging;

/// The stack reached a complete state.
#[derive(Debug, Clone, Copy)]
pub struct Converged;

/// The stack already matched the submission.
#[derive(Debug, Clone, Copy)]
pub struct NoChangesNeeded;

/// The reconciliation failed.
#[derive(Debug, Clone, Copy)]
pub struct Failed;

impl private::Sealed for Idle {}
impl private::Sealed for Created {}
impl private::Sealed for Updated {}
impl private::Sealed for Converging {}
impl private::Sealed for Converged {}
impl private::Sealed for NoChangesNeeded {}
impl private::Sealed for Failed {}

macro_rules! state_name {
    ($($state:ty => $name:literal),* $(,)?) => {
        $(impl ReconcileState for $state {
            fn name() -> &'static str {
                $name
            }
        })*
    };
}

state_name! {
    Idle => "idle",
    Created => "created",
    Updated => "updated",
    Converging => "converging",
    Converged => "converged",
    NoChangesNeeded => "no_changes_needed",
    Failed => "failed",
}

/// Data carried through every state.
#[derive(Debug, Clone)]
pub struct ReconcileData {
    /// Stack being reconciled.
    pub stack_name: StackName,
    /// Idempotency token of the submission.
    pub client_request_token: String,
    /// Operation accepted by the control plane.
    pub operation: Option<OperationHandle>,
    /// Outputs once converged.
    pub outputs: StackOutputs,
    /// Failure message.
    pub error: Option<String>,
    /// When reconciliation started.
    pub started_at: Instant,
}

/// A reconciliation in state `S`.
#[derive(Debug)]
pub struct Reconciliation<S: ReconcileState> {
    data: ReconcileData,
    _state: PhantomData<S>,
}

impl<S: ReconcileState> Reconciliation<S> {
    /// Get the reconciliation data.
    #[must_use]
    pub const fn data(&self) -> &ReconcileData {
        &self.data
    }

    /// Get the state name.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        S::name()
    }

    /// Consume into the underlying data.
    #[must_use]
    pub fn into_data(self) -> ReconcileData {
        self.data
    }

    fn transition<T: ReconcileState>(self) -> Reconciliation<T> {
        Reconciliation {
            data: self.data,
            _state: PhantomData,
        }
    }

    fn transition_with<T: ReconcileState>(
        mut self,
        f: impl FnOnce(&mut ReconcileData),
    ) -> Reconciliation<T> {
        f(&mut self.data);
        self.transition()
    }
}

impl Reconciliation<Idle> {
    /// Start reconciling a stack.
    #[must_use]
    pub fn start(stack_name: StackName, client_request_token: String) -> Self {
        Self {
            data: ReconcileData {
                stack_name,
                client_request_token,
                operation: None,
                outputs: StackOutputs::new(),
                error: None,
                started_at: Instant::now(),
            },
            _state: PhantomData,
        }
    }

    /// The control plane accepted a create.
    #[must_use]
    pub fn created(self, operation: OperationHandle) -> Reconciliation<Created> {
        self.transition_with(|data| data.operation = Some(operation))
    }

    /// The control plane accepted an update.
    #[must_use]
    pub fn updated(self, operation: OperationHandle) -> Reconciliation<Updated> {
        self.transition_with(|data| data.operation = Some(operation))
    }

    /// The control plane reported nothing to update.
    #[must_use]
    pub fn no_changes(self) -> Reconciliation<NoChangesNeeded> {
        self.transition()
    }

    /// The submission itself failed.
    #[must_use]
    pub fn fail(self, error: String) -> Reconciliation<Failed> {
        self.transition_with(|data| data.error = Some(error))
    }
}

impl Reconciliation<Created> {
    /// Begin waiting for the create to finish.
    #[must_use]
    pub fn converge(self) -> Reconciliation<Converging> {
        self.transition()
    }
}

impl Reconciliation<Updated> {
    /// Begin waiting for the update to finish.
    #[must_use]
    pub fn converge(self) -> Reconciliation<Converging> {
        self.transition()
    }
}

impl Reconciliation<Converging> {
    /// The operation completed; record the stack outputs.
    #[must_use]
    pub fn converged(self, outputs: StackOutputs) -> Reconciliation<Converged> {
        self.transition_with(|data| data.outputs = outputs)
    }

    /// The operation failed, timed out, or the outputs could not be read.
    #[must_use]
    pub fn fail(self, error: String) -> Reconciliation<Failed> {
        self.transition_with(|data| data.error = Some(error))
    }
}

/// A reconciliation in one of its terminal states.
#[derive(Debug)]
pub enum Reconciled {
    /// Stack converged.
    Converged(Reconciliation<Converged>),
    /// Nothing to apply.
    NoChangesNeeded(Reconciliation<NoChangesNeeded>),
    /// Reconciliation failed.
    Failed(Reconciliation<Failed>),
}

impl Reconciled {
    /// Get the reconciliation data.
    #[must_use]
    pub const fn data(&self) -> &ReconcileData {
        match self {
            Self::Converged(r) => r.data(),
            Self::NoChangesNeeded(r) => r.data(),
            Self::Failed(r) => r.data(),
        }
    }

    /// Get the terminal state name.
    #[must_use]
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Converged(r) => r.state_name(),
            Self::NoChangesNeeded(r) => r.state_name(),
            Self::Failed(r) => r.state_name(),
        }
    }
}

impl From<Reconciliation<Converged>> for Reconciled {
    fn from(r: Reconciliation<Converged>) -> Self {
        Self::Converged(r)
    }
}

impl From<Reconciliation<NoChangesNeeded>> for Reconciled {
    fn from(r: Reconciliation<NoChangesNeeded>) -> Self {
        Self::NoChangesNeeded(r)
    }
}

impl From<Reconciliation<Failed>> for Reconciled {
    fn from(r: Reconciliation<Failed>) -> Self {
        Self::Failed(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> Reconciliation<Idle> {
        Reconciliation::start(StackName::new("orders-svc"), "stackdeploy-abc".to_owned())
    }

    #[test]
    fn create_path() {
        let created = start().created(OperationHandle::new("op-1"));
        assert_eq!(created.state_name(), "created");
        assert_eq!(created.data().operation.as_ref().map(OperationHandle::as_str), Some("op-1"));

        let outputs = StackOutputs::from([("Url".to_owned(), "https://orders".to_owned())]);
        let converged = created.converge().converged(outputs.clone());
        assert_eq!(converged.state_name(), "converged");
        assert_eq!(converged.data().outputs, outputs);
    }

    #[test]
    fn update_then_fail() {
        let failed = start()
            .updated(OperationHandle::new("op-2"))
            .converge()
            .fail("UPDATE_ROLLBACK_COMPLETE".to_owned());
        assert_eq!(failed.state_name(), "failed");
        assert_eq!(failed.data().error.as_deref(), Some("UPDATE_ROLLBACK_COMPLETE"));
    }

    #[test]
    fn terminal_wrapper() {
        let reconciled: Reconciled = start().no_changes().into();
        assert_eq!(reconciled.state_name(), "no_changes_needed");
        assert!(reconciled.data().operation.is_none());

        let reconciled: Reconciled = start().fail("Template format error".to_owned()).into();
        assert!(matches!(reconciled, Reconciled::Failed(_)));
    }
}
