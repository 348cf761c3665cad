//! In-memory control plane for testing and local development.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::ControlPlaneError;
use crate::types::{DeployStackContext, OnCreateFailure, Parameter, StackName, StackOutputs, Tag};

use super::{ControlPlane, OperationHandle, OperationStatus, StackInfo, UpdateSubmission};

/// Control-plane entry points, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// `describe`.
    Describe,
    /// `create`.
    Create,
    /// `update`.
    Update,
    /// `operation_status`.
    OperationStatus,
}

/// Kind of mutation recorded by the in-memory control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    /// A create that mutated state.
    Create,
    /// An update that mutated state.
    Update,
}

/// A mutation applied by the in-memory control plane.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Create or update.
    pub kind: SubmissionKind,
    /// The submitted command.
    pub context: DeployStackContext,
    /// Operation the mutation started.
    pub operation: OperationHandle,
}

#[derive(Debug)]
struct MemoryStack {
    status: String,
    template: String,
    parameters: Vec<Parameter>,
    tags: Vec<Tag>,
    outputs: StackOutputs,
    tokens: HashMap<String, OperationHandle>,
}

#[derive(Debug)]
struct MemoryOperation {
    stack_name: String,
    kind: SubmissionKind,
    on_create_failure: OnCreateFailure,
    remaining_polls: u32,
    outcome: OperationStatus,
    applied: bool,
}

#[derive(Debug, Default)]
struct Inner {
    stacks: HashMap<String, MemoryStack>,
    operations: HashMap<String, MemoryOperation>,
    converged_outputs: HashMap<String, StackOutputs>,
    failures: HashMap<Call, VecDeque<ControlPlaneError>>,
    scheduled: HashMap<(Call, u32), ControlPlaneError>,
    calls: HashMap<Call, u32>,
    submissions: Vec<Submission>,
    in_progress_polls: u32,
    operation_failure: Option<String>,
}

impl Inner {
    fn enter(&mut self, call: Call) -> Result<(), ControlPlaneError> {
        let count = self.calls.entry(call).or_insert(0);
        *count += 1;
        if let Some(err) = self.scheduled.remove(&(call, *count)) {
            return Err(err);
        }
        match self.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn start_operation(&mut self, kind: SubmissionKind, context: &DeployStackContext) -> OperationHandle {
        let handle = OperationHandle::new(ulid::Ulid::new().to_string().to_lowercase());
        let outcome = match self.operation_failure.take() {
            Some(reason) => OperationStatus::Failed { reason },
            None => OperationStatus::Succeeded,
        };

        self.operations.insert(
            handle.as_str().to_owned(),
            MemoryOperation {
                stack_name: context.stack_name.as_str().to_owned(),
                kind,
                on_create_failure: context.on_create_failure,
                remaining_polls: self.in_progress_polls,
                outcome,
                applied: false,
            },
        );
        self.submissions.push(Submission {
            kind,
            context: context.clone(),
            operation: handle.clone(),
        });
        handle
    }

    fn finish_operation(&mut self, id: &str) {
        let Some(op) = self.operations.get_mut(id) else {
            return;
        };
        if op.applied {
            return;
        }
        op.applied = true;

        let stack_name = op.stack_name.clone();
        let kind = op.kind;
        let on_create_failure = op.on_create_failure;
        let succeeded = op.outcome == OperationStatus::Succeeded;

        match (kind, succeeded) {
            (SubmissionKind::Create, true) | (SubmissionKind::Update, true) => {
                let outputs = self.converged_outputs.remove(&stack_name);
                if let Some(stack) = self.stacks.get_mut(&stack_name) {
                    stack.status = match kind {
                        SubmissionKind::Create => "CREATE_COMPLETE",
                        SubmissionKind::Update => "UPDATE_COMPLETE",
                    }
                    .to_owned();
                    if let Some(outputs) = outputs {
                        stack.outputs = outputs;
                    }
                }
            }
            (SubmissionKind::Create, false) => match on_create_failure {
                OnCreateFailure::Delete => {
                    self.stacks.remove(&stack_name);
                }
                OnCreateFailure::Rollback => self.set_status(&stack_name, "ROLLBACK_COMPLETE"),
                OnCreateFailure::DoNothing => self.set_status(&stack_name, "CREATE_FAILED"),
            },
            (SubmissionKind::Update, false) => {
                self.set_status(&stack_name, "UPDATE_ROLLBACK_COMPLETE");
            }
        }
    }

    fn set_status(&mut self, stack_name: &str, status: &str) {
        if let Some(stack) = self.stacks.get_mut(stack_name) {
            status.clone_into(&mut stack.status);
        }
    }
}

/// In-memory control plane.
///
/// Honours idempotency tokens per stack, reports "no changes" when a
/// submitted update matches the applied template, parameters and tags, and
/// supports failure injection for tests. State is lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    inner: Mutex<Inner>,
}

impl MemoryControlPlane {
    /// Create an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an existing, converged stack.
    pub fn insert_stack(&self, name: impl Into<String>, outputs: StackOutputs) {
        self.insert_stack_with_template(name, "", Vec::new(), outputs);
    }

    /// Seed an existing stack with an applied template and parameters.
    pub fn insert_stack_with_template(
        &self,
        name: impl Into<String>,
        template: impl Into<String>,
        parameters: Vec<Parameter>,
        outputs: StackOutputs,
    ) {
        self.lock().stacks.insert(
            name.into(),
            MemoryStack {
                status: "CREATE_COMPLETE".to_owned(),
                template: template.into(),
                parameters,
                tags: Vec::new(),
                outputs,
                tokens: HashMap::new(),
            },
        );
    }

    /// Outputs the stack will have after its next successful operation.
    pub fn set_converged_outputs(&self, name: impl Into<String>, outputs: StackOutputs) {
        self.lock().converged_outputs.insert(name.into(), outputs);
    }

    /// Make the next call of the given kind fail with `error`.
    ///
    /// Calls may be queued; each failure is used once.
    pub fn fail_next(&self, call: Call, error: ControlPlaneError) {
        self.lock().failures.entry(call).or_default().push_back(error);
    }

    /// Make the `nth` call (1-based, counted over the control plane's
    /// lifetime) to `call` fail with `error`.
    pub fn fail_nth(&self, call: Call, nth: u32, error: ControlPlaneError) {
        self.lock().scheduled.insert((call, nth), error);
    }

    /// Number of status polls that report in-progress before an operation finishes.
    pub fn set_in_progress_polls(&self, polls: u32) {
        self.lock().in_progress_polls = polls;
    }

    /// Make the next started operation finish unsuccessfully.
    pub fn fail_next_operation(&self, reason: impl Into<String>) {
        self.lock().operation_failure = Some(reason.into());
    }

    /// Number of times the given entry point was called.
    #[must_use]
    pub fn calls(&self, call: Call) -> u32 {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Mutations applied so far, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    /// Current status of a stack, if it exists.
    #[must_use]
    pub fn stack_status(&self, name: &str) -> Option<String> {
        self.lock().stacks.get(name).map(|s| s.status.clone())
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn describe(
        &self,
        stack_name: &StackName,
        _role_arn: &str,
    ) -> Result<Option<StackInfo>, ControlPlaneError> {
        let mut inner = self.lock();
        inner.enter(Call::Describe)?;

        Ok(inner.stacks.get(stack_name.as_str()).map(|stack| StackInfo {
            name: stack_name.clone(),
            status: stack.status.clone(),
            outputs: stack.outputs.clone(),
        }))
    }

    async fn create(
        &self,
        context: &DeployStackContext,
    ) -> Result<OperationHandle, ControlPlaneError> {
        let mut inner = self.lock();
        inner.enter(Call::Create)?;

        let name = context.stack_name.as_str();
        if let Some(stack) = inner.stacks.get(name) {
            if let Some(handle) = stack.tokens.get(&context.client_request_token) {
                return Ok(handle.clone());
            }
            return Err(ControlPlaneError::Validation(format!(
                "Stack [{name}] already exists"
            )));
        }

        let handle = inner.start_operation(SubmissionKind::Create, context);
        inner.stacks.insert(
            name.to_owned(),
            MemoryStack {
                status: "CREATE_IN_PROGRESS".to_owned(),
                template: context.template.clone(),
                parameters: context.parameters.clone(),
                tags: context.tags.clone(),
                outputs: StackOutputs::new(),
                tokens: HashMap::from([(context.client_request_token.clone(), handle.clone())]),
            },
        );
        Ok(handle)
    }

    async fn update(
        &self,
        context: &DeployStackContext,
    ) -> Result<UpdateSubmission, ControlPlaneError> {
        let mut inner = self.lock();
        inner.enter(Call::Update)?;

        let name = context.stack_name.as_str();
        let Some(stack) = inner.stacks.get(name) else {
            return Err(ControlPlaneError::Validation(format!(
                "Stack with id {name} does not exist"
            )));
        };

        if let Some(handle) = stack.tokens.get(&context.client_request_token) {
            return Ok(UpdateSubmission::Started(handle.clone()));
        }

        let busy = inner
            .operations
            .values()
            .any(|op| op.stack_name == name && !op.applied);
        if busy {
            return Err(ControlPlaneError::ConcurrentModification(format!(
                "Stack:{name} is in {} state and can not be updated.",
                stack.status
            )));
        }

        if stack.template == context.template
            && stack.parameters == context.parameters
            && stack.tags == context.tags
        {
            return Ok(UpdateSubmission::NoChanges);
        }

        let handle = inner.start_operation(SubmissionKind::Update, context);
        if let Some(stack) = inner.stacks.get_mut(name) {
            stack.status = "UPDATE_IN_PROGRESS".to_owned();
            stack.template.clone_from(&context.template);
            stack.parameters.clone_from(&context.parameters);
            stack.tags.clone_from(&context.tags);
            stack
                .tokens
                .insert(context.client_request_token.clone(), handle.clone());
        }
        Ok(UpdateSubmission::Started(handle))
    }

    async fn operation_status(
        &self,
        _stack_name: &StackName,
        operation: &OperationHandle,
        _role_arn: &str,
    ) -> Result<OperationStatus, ControlPlaneError> {
        let mut inner = self.lock();
        inner.enter(Call::OperationStatus)?;

        let Some(op) = inner.operations.get_mut(operation.as_str()) else {
            return Err(ControlPlaneError::Validation(format!(
                "unknown operation {operation}"
            )));
        };

        if op.remaining_polls > 0 {
            op.remaining_polls -= 1;
            return Ok(OperationStatus::InProgress);
        }

        let outcome = op.outcome.clone();
        inner.finish_operation(operation.as_str());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(stack: &str, token: &str, template: &str) -> DeployStackContext {
        DeployStackContext {
            stack_name: StackName::new(stack),
            template: template.to_owned(),
            role_arn: "role".to_owned(),
            parameters: vec![Parameter::new("Env", "prod")],
            tags: Vec::new(),
            stack_policy: None,
            client_request_token: token.to_owned(),
            capabilities: Vec::new(),
            notification_target: None,
            on_create_failure: OnCreateFailure::Delete,
        }
    }

    #[tokio::test]
    async fn repeated_token_does_not_mutate_twice() {
        let cp = MemoryControlPlane::new();
        let ctx = context("orders", "tok-1", "v1");

        let first = cp.create(&ctx).await.unwrap();
        let second = cp.create(&ctx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cp.submissions().len(), 1);

        let update = cp.update(&ctx).await.unwrap();
        assert_eq!(update, UpdateSubmission::Started(first));
        assert_eq!(cp.submissions().len(), 1);
    }

    #[tokio::test]
    async fn identical_update_reports_no_changes() {
        let cp = MemoryControlPlane::new();
        cp.insert_stack_with_template(
            "orders",
            "v1",
            vec![Parameter::new("Env", "prod")],
            StackOutputs::new(),
        );

        let result = cp.update(&context("orders", "tok-2", "v1")).await.unwrap();
        assert_eq!(result, UpdateSubmission::NoChanges);
        assert!(cp.submissions().is_empty());
    }

    #[tokio::test]
    async fn failed_create_is_deleted() {
        let cp = MemoryControlPlane::new();
        cp.fail_next_operation("Resource creation cancelled");

        let ctx = context("orders", "tok-3", "v1");
        let handle = cp.create(&ctx).await.unwrap();
        let status = cp
            .operation_status(&ctx.stack_name, &handle, "role")
            .await
            .unwrap();

        assert_eq!(
            status,
            OperationStatus::Failed {
                reason: "Resource creation cancelled".to_owned()
            }
        );
        assert_eq!(cp.stack_status("orders"), None);
    }

    #[tokio::test]
    async fn operations_report_progress_before_finishing() {
        let cp = MemoryControlPlane::new();
        cp.set_in_progress_polls(2);
        cp.set_converged_outputs("orders", StackOutputs::from([("Url".to_owned(), "u".to_owned())]));

        let ctx = context("orders", "tok-4", "v1");
        let handle = cp.create(&ctx).await.unwrap();
        for _ in 0..2 {
            let status = cp.operation_status(&ctx.stack_name, &handle, "role").await.unwrap();
            assert_eq!(status, OperationStatus::InProgress);
        }
        let status = cp.operation_status(&ctx.stack_name, &handle, "role").await.unwrap();
        assert_eq!(status, OperationStatus::Succeeded);
        assert_eq!(cp.stack_status("orders").as_deref(), Some("CREATE_COMPLETE"));

        let info = cp.describe(&ctx.stack_name, "role").await.unwrap().unwrap();
        assert_eq!(info.outputs["Url"], "u");
    }

    #[tokio::test]
    async fn update_is_refused_while_an_operation_is_running() {
        let cp = MemoryControlPlane::new();
        cp.insert_stack_with_template("orders", "v1", Vec::new(), StackOutputs::new());

        let first = context("orders", "tok-5", "v2");
        let UpdateSubmission::Started(handle) = cp.update(&first).await.unwrap() else {
            panic!("expected the first update to start");
        };

        let err = cp.update(&context("orders", "tok-6", "v3")).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::ConcurrentModification(_)));
        assert!(err.is_transient());

        let status = cp.operation_status(&first.stack_name, &handle, "role").await.unwrap();
        assert_eq!(status, OperationStatus::Succeeded);

        let retried = cp.update(&context("orders", "tok-6", "v3")).await.unwrap();
        assert!(matches!(retried, UpdateSubmission::Started(_)));
        assert_eq!(cp.submissions().len(), 2);
    }

    #[tokio::test]
    async fn nth_call_failure_skips_earlier_calls() {
        let cp = MemoryControlPlane::new();
        cp.fail_nth(Call::Describe, 2, ControlPlaneError::AccessDenied("role".to_owned()));

        let name = StackName::new("orders");
        assert!(cp.describe(&name, "role").await.is_ok());
        assert!(cp.describe(&name, "role").await.is_err());
        assert!(cp.describe(&name, "role").await.is_ok());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_once() {
        let cp = MemoryControlPlane::new();
        cp.fail_next(Call::Describe, ControlPlaneError::Unavailable("503".to_owned()));

        let name = StackName::new("orders");
        assert!(cp.describe(&name, "role").await.is_err());
        assert!(cp.describe(&name, "role").await.is_ok());
        assert_eq!(cp.calls(Call::Describe), 2);
    }
}
