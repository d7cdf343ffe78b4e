//! Per-call deadline and cancellation.

use crate::traits::ObjectStoreError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation token attached to one network operation.
///
/// A context is created per descriptor operation from the configured I/O
/// timeout. Long-lived operations (a streaming body, an upload) keep their
/// context for their whole lifetime, so cancelling the token interrupts them
/// at the next blocking step.
#[derive(Debug, Clone)]
pub struct IoContext {
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
}

impl IoContext {
    pub fn new(timeout: Duration) -> Self {
        Self::with_token(timeout, CancellationToken::new())
    }

    pub fn with_token(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            cancel,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Token to await in async code, or to share with a child operation.
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Fail if the operation was cancelled or its deadline has passed.
    pub fn check(&self, what: &str) -> Result<(), ObjectStoreError> {
        if self.is_cancelled() {
            return Err(ObjectStoreError::Canceled(what.to_string()));
        }
        if self.is_expired() {
            return Err(ObjectStoreError::Timeout(format!(
                "{} exceeded {:?}",
                what, self.timeout
            )));
        }
        Ok(())
    }
}
