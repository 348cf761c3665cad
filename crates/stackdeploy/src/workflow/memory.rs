//! In-memory workflow engine for testing.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::WorkflowError;
use crate::types::TaskToken;

use super::WorkflowClient;

/// A signal accepted by the in-memory engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Task resumed as succeeded.
    Success {
        /// Task token.
        token: TaskToken,
        /// JSON payload.
        output: Value,
    },
    /// Task resumed as failed.
    Failure {
        /// Task token.
        token: TaskToken,
        /// Error code.
        error: String,
        /// Failure cause.
        cause: String,
    },
}

#[derive(Debug, Default)]
struct Inner {
    signals: Vec<Signal>,
    consumed: HashSet<TaskToken>,
    expired: HashSet<TaskToken>,
    failures: VecDeque<WorkflowError>,
    lose_response: bool,
    attempts: u32,
}

impl Inner {
    fn accept(&mut self, token: &TaskToken, signal: Signal) -> Result<(), WorkflowError> {
        self.attempts += 1;
        if let Some(err) = self.failures.pop_front() {
            return Err(err);
        }
        if self.expired.contains(token) {
            return Err(WorkflowError::TaskTimedOut);
        }
        if !self.consumed.insert(token.clone()) {
            return Err(WorkflowError::TaskTokenConsumed);
        }
        self.signals.push(signal);
        if std::mem::take(&mut self.lose_response) {
            return Err(WorkflowError::Unavailable("response lost".to_owned()));
        }
        Ok(())
    }
}

/// Workflow engine that records signals and consumes tokens on first use.
#[derive(Debug, Default)]
pub struct MemoryWorkflowClient {
    inner: Mutex<Inner>,
}

impl MemoryWorkflowClient {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next send fail with `error`. Failures queue up.
    pub fn fail_next(&self, error: WorkflowError) {
        self.lock().failures.push_back(error);
    }

    /// Accept the next signal but report it as unavailable, as if the
    /// response were lost in transit.
    pub fn lose_next_response(&self) {
        self.lock().lose_response = true;
    }

    /// Mark a token as timed out.
    pub fn expire(&self, token: &TaskToken) {
        self.lock().expired.insert(token.clone());
    }

    /// Accepted signals, in order.
    #[must_use]
    pub fn signals(&self) -> Vec<Signal> {
        self.lock().signals.clone()
    }

    /// Send attempts, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }
}

#[async_trait]
impl WorkflowClient for MemoryWorkflowClient {
    async fn send_success(&self, token: &TaskToken, output: &Value) -> Result<(), WorkflowError> {
        self.lock().accept(
            token,
            Signal::Success {
                token: token.clone(),
                output: output.clone(),
            },
        )
    }

    async fn send_failure(
        &self,
        token: &TaskToken,
        error: &str,
        cause: &str,
    ) -> Result<(), WorkflowError> {
        self.lock().accept(
            token,
            Signal::Failure {
                token: token.clone(),
                error: error.to_owned(),
                cause: cause.to_owned(),
            },
        )
    }
}
