//! In-memory commit status client for testing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::{DeployError, DeployResult};
use crate::types::CommitInfo;

use super::{CommitStatus, CommitStatusClient};

/// A status accepted by [`MemoryStatusClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedStatus {
    /// Commit the status was attached to.
    pub commit: CommitInfo,
    /// The status.
    pub status: CommitStatus,
}

#[derive(Debug, Default)]
struct Inner {
    reported: Vec<ReportedStatus>,
    failures: VecDeque<DeployError>,
    attempts: u32,
}

/// Records statuses instead of posting them.
#[derive(Debug, Default)]
pub struct MemoryStatusClient {
    inner: Mutex<Inner>,
}

impl MemoryStatusClient {
    /// Create an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next report fail with `error`.
    pub fn fail_next(&self, error: DeployError) {
        self.lock().failures.push_back(error);
    }

    /// Accepted statuses, in order.
    #[must_use]
    pub fn reported(&self) -> Vec<ReportedStatus> {
        self.lock().reported.clone()
    }

    /// Report attempts, accepted or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }
}

#[async_trait]
impl CommitStatusClient for MemoryStatusClient {
    async fn report(&self, commit: &CommitInfo, status: &CommitStatus) -> DeployResult<()> {
        let mut inner = self.lock();
        inner.attempts += 1;
        if let Some(err) = inner.failures.pop_front() {
            return Err(err);
        }
        inner.reported.push(ReportedStatus {
            commit: commit.clone(),
            status: status.clone(),
        });
        Ok(())
    }
}
